use crate::db::{assessments, submissions};
use crate::domain::models::{RoleKind, SubmittedAnswers};
use crate::error::{AppError, AppResult};
use crate::services::access;
use crate::services::attachments::{Attachment, MAX_ATTACHMENT_BYTES};
use crate::services::grading;
use crate::services::submissions::{submit, SubmissionRequest};
use crate::state::SharedState;
use crate::web::response::{ApiResponse, FieldErrors, JsonBody};
use crate::web::session::UserSession;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    routing::{get, patch},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradeUpdate {
    pub score: i32,
}

/// Room for the attachment plus the text fields around it.
const SUBMISSION_BODY_LIMIT: usize = MAX_ATTACHMENT_BYTES + 1024 * 1024;

/// Mounted next to the assessment routes: `/assessments/:id/submissions`.
pub fn assessment_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/:id/submissions",
            get(list_for_assessment).post(create_submission),
        )
        .layer(DefaultBodyLimit::max(SUBMISSION_BODY_LIMIT))
        .with_state(state)
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/me", get(list_mine))
        .route("/me/assessment/:id", get(mine_for_assessment))
        .route("/:id", get(get_submission))
        .route("/:id/grade", patch(update_grade))
        .route("/:id/grade_changes", get(list_grade_changes))
        .with_state(state)
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::validation_with("Validation error", json!({ "body": [err.body_text()] }))
}

/// Reads `role_id`, `answer` (a JSON object encoded as a string) and `file`.
async fn read_submission_form(assessment_id: i64, multipart: &mut Multipart) -> AppResult<SubmissionRequest> {
    let mut role_id = None;
    let mut answer = None;
    let mut attachment = None;
    let mut errors = FieldErrors::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "role_id" => {
                let raw = field.text().await.map_err(multipart_error)?;
                match raw.trim().parse::<i64>() {
                    Ok(id) => role_id = Some(id),
                    Err(_) => errors.add("role_id", "Role id must be an integer"),
                }
            }
            "answer" => {
                let raw = field.text().await.map_err(multipart_error)?;
                if raw.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SubmittedAnswers>(&raw) {
                    Ok(parsed) => answer = Some(parsed),
                    Err(_) => errors.add("answer", "Answer must be a JSON object"),
                }
            }
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if file_name.is_empty() && bytes.is_empty() {
                    continue;
                }
                attachment = Some(Attachment {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    if role_id.is_none() {
        errors.add("role_id", "Role id is required");
    }
    errors.into_result()?;
    let role_id = role_id.ok_or_else(|| AppError::validation("Role id is required"))?;

    Ok(SubmissionRequest {
        assessment_id,
        role_id,
        answer,
        attachment,
    })
}

async fn create_submission(
    State(state): State<SharedState>,
    session: UserSession,
    Path(assessment_id): Path<i64>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<ApiResponse> {
    let mut multipart = multipart.map_err(|rejection| {
        AppError::validation_with("Validation error", json!({ "body": [rejection.body_text()] }))
    })?;
    let request = read_submission_form(assessment_id, &mut multipart).await?;
    let submission = submit(&state, session.user_id(), request, Utc::now()).await?;
    Ok(ApiResponse::with("Submission created", &submission)?.created())
}

async fn list_for_assessment(
    State(state): State<SharedState>,
    session: UserSession,
    Path(assessment_id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let assessment = assessments::find_scoped_assessment(&mut conn, assessment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Assessment not found".to_string()))?;
    access::require_role(&mut conn, session.user_id(), assessment.institute_id, RoleKind::Instructor).await?;

    let rows = submissions::list_by_assessment(&mut conn, assessment_id).await?;
    ApiResponse::list("Submissions", "submissions", &rows)
}

async fn list_mine(State(state): State<SharedState>, session: UserSession) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let role_ids = access::own_role_ids(&mut conn, session.user_id()).await?;
    let rows = submissions::list_for_roles(&mut conn, &role_ids).await?;
    ApiResponse::list("Submissions", "submissions", &rows)
}

async fn mine_for_assessment(
    State(state): State<SharedState>,
    session: UserSession,
    Path(assessment_id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let role_ids = access::own_role_ids(&mut conn, session.user_id()).await?;
    let submission = submissions::find_for_roles_and_assessment(&mut conn, &role_ids, assessment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Submission not found".to_string()))?;
    ApiResponse::with("Submission", &submission)
}

/// The submitting role's owner, or an instructor of the owning institute.
async fn get_submission(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let submission = submissions::find_submission(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Submission not found".to_string()))?;

    let role_ids = access::own_role_ids(&mut conn, session.user_id()).await?;
    if !role_ids.contains(&submission.role_id) {
        let assessment = assessments::find_scoped_assessment(&mut conn, submission.assessment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Assessment not found".to_string()))?;
        access::require_role(&mut conn, session.user_id(), assessment.institute_id, RoleKind::Instructor).await?;
    }
    ApiResponse::with("Submission", &submission)
}

async fn update_grade(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<GradeUpdate>,
) -> AppResult<ApiResponse> {
    let submission = grading::update_score(&state.pool, session.user_id(), id, payload.score).await?;
    ApiResponse::with("Grade updated", &submission)
}

async fn list_grade_changes(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let submission = submissions::find_submission(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Submission not found".to_string()))?;
    let assessment = assessments::find_scoped_assessment(&mut conn, submission.assessment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Assessment not found".to_string()))?;
    access::require_role(&mut conn, session.user_id(), assessment.institute_id, RoleKind::Instructor).await?;

    let changes = submissions::list_grade_changes(&mut conn, id).await?;
    ApiResponse::list("Grade changes", "grade_changes", &changes)
}
