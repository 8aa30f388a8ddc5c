//! End-to-end flows through the HTTP router. These need a Postgres server:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use lms_backend::services::file_store::LocalFileStore;
use lms_backend::state::AppState;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "lms-test-boundary";

fn test_app(pool: PgPool) -> Router {
    let upload_dir = std::env::temp_dir().join(format!("lms-it-{}", uuid::Uuid::new_v4()));
    let state = AppState {
        pool,
        session_key: b"integration-session-key-32-bytes".to_vec(),
        token_ttl: Duration::hours(8),
        file_store: Arc::new(LocalFileStore::new(upload_dir, "http://files.test")),
        upload_timeout: std::time::Duration::from_secs(5),
        secure_cookies: false,
    };
    lms_backend::app(Arc::new(state))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn submission_request(assessment_id: i64, token: &str, role_id: i64, answer: Option<Value>) -> Request<Body> {
    multipart_submission(assessment_id, token, role_id, answer, None)
}

/// `file` is (file name, content type, bytes).
fn multipart_submission(
    assessment_id: i64,
    token: &str,
    role_id: i64,
    answer: Option<Value>,
    file: Option<(&str, &str, &str)>,
) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"role_id\"\r\n\r\n{role_id}\r\n"
    );
    if let Some(answer) = answer {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"answer\"\r\n\r\n{answer}\r\n"
        ));
    }
    if let Some((file_name, content_type, contents)) = file {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n{contents}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::builder()
        .method(Method::POST)
        .uri(format!("/api/v1/assessments/{assessment_id}/submissions"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Registers and logs in a user; returns (user_id, token).
async fn sign_up(app: &Router, name: &str, email: &str) -> (i64, String) {
    let (status, body) = call(
        app,
        json_request(
            Method::POST,
            "/api/v1/auth/register",
            None,
            json!({ "name": name, "email": email, "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let user_id = body["id"].as_i64().unwrap();

    let (status, body) = call(
        app,
        json_request(
            Method::POST,
            "/api/v1/auth/login",
            None,
            json!({ "email": email, "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (user_id, body["token"].as_str().unwrap().to_string())
}

/// Assigns a role in the institute and activates it; returns the role id.
async fn grant_active_role(app: &Router, admin_token: &str, institute_id: i64, user_id: i64, role: &str) -> i64 {
    let (status, body) = call(
        app,
        json_request(
            Method::POST,
            &format!("/api/v1/institutes/{institute_id}/roles"),
            Some(admin_token),
            json!({ "user_id": user_id, "role": role }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "pending");
    let role_id = body["id"].as_i64().unwrap();

    let (status, body) = call(
        app,
        json_request(
            Method::PATCH,
            &format!("/api/v1/institutes/{institute_id}/roles/{role_id}"),
            Some(admin_token),
            json!({ "status": "active" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    role_id
}

struct Fixture {
    app: Router,
    instructor_token: String,
    instructor_role_id: i64,
    student_token: String,
    student_role_id: i64,
    module_id: i64,
    assessment_id: i64,
}

/// Institute -> self admin -> instructor course -> module -> choices
/// assessment with a two-question detail -> active student.
async fn setup(pool: PgPool, deadline: chrono::DateTime<Utc>) -> Fixture {
    let app = test_app(pool);
    let (admin_id, admin_token) = sign_up(&app, "Ada Admin", "ada@example.com").await;

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/api/v1/institutes",
            Some(&admin_token),
            json!({ "name": "Rust Academy" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["role"]["role"], "admin");
    assert_eq!(body["role"]["status"], "active");
    let institute_id = body["institute"]["id"].as_i64().unwrap();

    let instructor_role_id = grant_active_role(&app, &admin_token, institute_id, admin_id, "instructor").await;

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/api/v1/courses",
            Some(&admin_token),
            json!({
                "institute_id": institute_id,
                "role_id": instructor_role_id,
                "title": "Ownership",
                "description": "Borrowing and lifetimes",
                "category": "programming"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let course_id = body["id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/api/v1/modules",
            Some(&admin_token),
            json!({ "course_id": course_id, "title": "Week 1", "content": "Moves" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let module_id = body["id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/api/v1/assessments",
            Some(&admin_token),
            json!({ "module_id": module_id, "type": "choices" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let assessment_id = body["id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            &format!("/api/v1/assessments_details/{assessment_id}"),
            Some(&admin_token),
            json!({
                "title": "Quiz 1",
                "question": { "1": ["A", "B"], "2": ["A", "B"] },
                "answer": { "1": "A", "2": "B" },
                "deadline": deadline.to_rfc3339()
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (student_id, student_token) = sign_up(&app, "Sam Student", "sam@example.com").await;
    let student_role_id = grant_active_role(&app, &admin_token, institute_id, student_id, "student").await;

    Fixture {
        app,
        instructor_token: admin_token,
        instructor_role_id,
        student_token,
        student_role_id,
        module_id,
        assessment_id,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn half_right_choices_submission_scores_fifty(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;

    let (status, body) = call(
        &fx.app,
        submission_request(
            fx.assessment_id,
            &fx.student_token,
            fx.student_role_id,
            Some(json!({ "1": "A", "2": "C" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["score"], 50);
    assert_eq!(body["role_id"], fx.student_role_id);

    let (status, body) = call(
        &fx.app,
        get_request(
            &format!("/api/v1/submissions/me/assessment/{}", fx.assessment_id),
            &fx.student_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["score"], 50);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn second_submission_conflicts(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;
    let answer = json!({ "1": "A", "2": "B" });

    let (first, _) = call(
        &fx.app,
        submission_request(fx.assessment_id, &fx.student_token, fx.student_role_id, Some(answer.clone())),
    )
    .await;
    let (second, body) = call(
        &fx.app,
        submission_request(fx.assessment_id, &fx.student_token, fx.student_role_id, Some(answer)),
    )
    .await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["message"], "already submitted");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn parallel_submissions_admit_exactly_one(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;
    let answer = json!({ "1": "A", "2": "B" });

    let (a, b) = futures::join!(
        call(
            &fx.app,
            submission_request(fx.assessment_id, &fx.student_token, fx.student_role_id, Some(answer.clone())),
        ),
        call(
            &fx.app,
            submission_request(fx.assessment_id, &fx.student_token, fx.student_role_id, Some(answer.clone())),
        ),
    );

    let mut statuses = vec![a.0.as_u16(), b.0.as_u16()];
    statuses.sort_unstable();
    assert_eq!(statuses, vec![201, 409]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn submission_after_deadline_is_refused(pool: PgPool) {
    let fx = setup(pool, Utc::now() - Duration::minutes(1)).await;

    let (status, body) = call(
        &fx.app,
        submission_request(
            fx.assessment_id,
            &fx.student_token,
            fx.student_role_id,
            Some(json!({ "1": "A", "2": "B" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Assessment deadline has passed");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn instructor_role_cannot_submit(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;

    let (status, _) = call(
        &fx.app,
        submission_request(
            fx.assessment_id,
            &fx.instructor_token,
            fx.instructor_role_id,
            Some(json!({ "1": "A", "2": "B" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Someone else's student role is refused the same way.
    let (status, _) = call(
        &fx.app,
        submission_request(
            fx.assessment_id,
            &fx.instructor_token,
            fx.student_role_id,
            Some(json!({ "1": "A", "2": "B" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn only_instructors_change_grades(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;

    let (_, body) = call(
        &fx.app,
        submission_request(
            fx.assessment_id,
            &fx.student_token,
            fx.student_role_id,
            Some(json!({ "1": "A", "2": "C" })),
        ),
    )
    .await;
    let submission_id = body["id"].as_i64().unwrap();
    let grade_uri = format!("/api/v1/submissions/{submission_id}/grade");

    let (status, _) = call(
        &fx.app,
        json_request(Method::PATCH, &grade_uri, Some(&fx.student_token), json!({ "score": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let submission_uri = format!("/api/v1/submissions/{submission_id}");
    let (_, body) = call(&fx.app, get_request(&submission_uri, &fx.student_token)).await;
    assert_eq!(body["score"], 50);

    let (status, _) = call(
        &fx.app,
        json_request(Method::PATCH, &grade_uri, Some(&fx.instructor_token), json!({ "score": 101 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &fx.app,
        json_request(Method::PATCH, &grade_uri, Some(&fx.instructor_token), json!({ "score": 80 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["score"], 80);

    let (status, body) = call(
        &fx.app,
        get_request(&format!("/api/v1/submissions/{submission_id}/grade_changes"), &fx.instructor_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let changes = body["grade_changes"].as_array().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["previous_score"], 50);
    assert_eq!(changes[0]["new_score"], 80);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn students_see_detail_without_answer_key(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;
    let uri = format!("/api/v1/assessments_details/{}", fx.assessment_id);

    let (status, body) = call(&fx.app, get_request(&uri, &fx.student_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("answer").is_none());
    let question_ids: Vec<&String> = body["question"].as_object().unwrap().keys().collect();
    assert_eq!(question_ids, ["1", "2"]);

    let (_, body) = call(&fx.app, get_request(&uri, &fx.instructor_token)).await;
    assert_eq!(body["answer"]["2"], "B");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn logged_out_token_is_rejected(pool: PgPool) {
    let app = test_app(pool);
    let (_, token) = sign_up(&app, "Lee Logout", "lee@example.com").await;

    let (status, _) = call(&app, get_request("/api/v1/users/profile", &token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        json_request(Method::POST, "/api/v1/users/logout", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, get_request("/api/v1/users/profile", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token has been revoked");
}

/// Adds an essay assessment with a detail to the fixture's module.
async fn essay_assessment(fx: &Fixture) -> i64 {
    let (status, body) = call(
        &fx.app,
        json_request(
            Method::POST,
            "/api/v1/assessments",
            Some(&fx.instructor_token),
            json!({ "module_id": fx.module_id, "type": "essay" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let assessment_id = body["id"].as_i64().unwrap();

    let (status, body) = call(
        &fx.app,
        json_request(
            Method::POST,
            &format!("/api/v1/assessments_details/{assessment_id}"),
            Some(&fx.instructor_token),
            json!({
                "title": "Essay 1",
                "question": { "prompt": "Explain borrowing" },
                "deadline": (Utc::now() + Duration::hours(1)).to_rfc3339()
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assessment_id
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn essay_submission_stores_file_without_score(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;
    let essay_id = essay_assessment(&fx).await;

    let (status, body) = call(
        &fx.app,
        multipart_submission(
            essay_id,
            &fx.student_token,
            fx.student_role_id,
            None,
            Some(("essay.txt", "text/plain", "Borrowing lends access without moving.")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["score"].is_null());
    let file = body["file"].as_str().unwrap();
    assert!(file.starts_with("http://files.test/uploads/SUBMISSION-"), "{file}");
    assert!(file.ends_with(".txt"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn essay_without_file_is_rejected(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;
    let essay_id = essay_assessment(&fx).await;

    let (status, body) = call(
        &fx.app,
        submission_request(essay_id, &fx.student_token, fx.student_role_id, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["file"][0], "A file is required for essay assessments");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn choices_without_answer_is_rejected(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;

    let (status, body) = call(
        &fx.app,
        submission_request(fx.assessment_id, &fx.student_token, fx.student_role_id, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["answer"][0], "Answers are required for choices assessments");

    let (status, _) = call(
        &fx.app,
        get_request(
            &format!("/api/v1/submissions/me/assessment/{}", fx.assessment_id),
            &fx.student_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn switching_to_essay_keeps_detail_editable(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;

    let (status, body) = call(
        &fx.app,
        json_request(
            Method::PATCH,
            &format!("/api/v1/assessments/{}", fx.assessment_id),
            Some(&fx.instructor_token),
            json!({ "type": "essay" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = call(
        &fx.app,
        json_request(
            Method::PATCH,
            &format!("/api/v1/assessment_details/{}", fx.assessment_id),
            Some(&fx.instructor_token),
            json!({ "deadline": "2031-01-01T10:00:00" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["answer"].is_null());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn list_all_routes_show_the_callers_institutes(pool: PgPool) {
    let fx = setup(pool, Utc::now() + Duration::hours(1)).await;

    let (status, body) = call(&fx.app, get_request("/api/v1/assessments", &fx.student_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assessments"][0]["id"], fx.assessment_id);

    let (status, body) = call(&fx.app, get_request("/api/v1/modules", &fx.student_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modules"][0]["id"], fx.module_id);

    let (_, outsider) = sign_up(&fx.app, "Olive Outsider", "olive@example.com").await;
    let (status, body) = call(&fx.app, get_request("/api/v1/modules", &outsider)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modules"], json!([]));
}
