use crate::db::assessments::{self as store, AssessmentChanges, AssessmentDetail, NewDetail};
use crate::db;
use crate::domain::models::{active_role_in, AnswerKey, AssessmentType, QuestionMap, RoleKind};
use crate::domain::scoring::uncovered_questions;
use crate::error::{conflict_on_reference, conflict_on_unique, AppError, AppResult};
use crate::services::access;
use crate::state::SharedState;
use crate::time_utils::deadline_format;
use crate::web::courses::list_module_assessments;
use crate::web::response::{valid_length, ApiResponse, FieldErrors, JsonBody};
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use sqlx::PgConnection;

#[derive(Deserialize)]
pub struct CreateAssessment {
    pub module_id: i64,
    #[serde(rename = "type")]
    pub kind: AssessmentType,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAssessment {
    pub module_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<AssessmentType>,
}

#[derive(Deserialize)]
pub struct CreateDetail {
    pub title: String,
    pub question: QuestionMap,
    pub answer: Option<AnswerKey>,
    #[serde(with = "deadline_format")]
    pub deadline: DateTime<Utc>,
}

/// The only detail fields a client may change.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateDetail {
    pub title: Option<String>,
    pub question: Option<QuestionMap>,
    /// `Some(None)` is an explicit `"answer": null` and clears the key.
    #[serde(default, deserialize_with = "present")]
    pub answer: Option<Option<AnswerKey>>,
    #[serde(default, deserialize_with = "deadline_format::deserialize_opt")]
    pub deadline: Option<DateTime<Utc>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_assessments).post(create_assessment))
        .route("/module/:module_id", get(list_module_assessments))
        .route(
            "/:id",
            get(get_assessment).patch(update_assessment).delete(delete_assessment),
        )
        .with_state(state)
}

/// Mounted at `/assessments_details`.
pub fn details_router(state: SharedState) -> Router {
    Router::new()
        .route("/:assessment_id", post(create_detail).get(get_detail))
        .with_state(state)
}

/// Mounted at `/assessment_details`.
pub fn detail_updates_router(state: SharedState) -> Router {
    Router::new()
        .route("/:assessment_id", patch(update_detail))
        .with_state(state)
}

async fn require_instructor_of_module(conn: &mut PgConnection, user_id: i64, module_id: i64) -> AppResult<()> {
    let institute_id = access::module_institute(conn, module_id).await?;
    access::require_role(conn, user_id, institute_id, RoleKind::Instructor).await?;
    Ok(())
}

async fn load_scoped(conn: &mut PgConnection, id: i64) -> AppResult<store::ScopedAssessment> {
    store::find_scoped_assessment(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Assessment not found".to_string()))
}

async fn create_assessment(
    State(state): State<SharedState>,
    session: UserSession,
    JsonBody(payload): JsonBody<CreateAssessment>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    require_instructor_of_module(&mut *tx, session.user_id(), payload.module_id).await?;
    let assessment = store::insert_assessment(&mut *tx, payload.module_id, payload.kind).await?;
    tx.commit().await?;

    tracing::info!(assessment_id = assessment.id, module_id = assessment.module_id, kind = ?assessment.kind, "Assessment created");
    Ok(ApiResponse::with("Assessment created", &assessment)?.created())
}

async fn list_assessments(State(state): State<SharedState>, session: UserSession) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let assessments = store::list_visible_assessments(&mut conn, session.user_id()).await?;
    ApiResponse::list("Assessments", "assessments", &assessments)
}

async fn get_assessment(
    State(state): State<SharedState>,
    _session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let assessment = store::find_assessment(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Assessment not found".to_string()))?;
    ApiResponse::with("Assessment", &assessment)
}

/// Changing `type` after submissions exist is allowed; a choices assessment
/// without an answer key then fails at scoring time. Switching to essay drops
/// the detail's answer key.
async fn update_assessment(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<UpdateAssessment>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    let current = load_scoped(&mut *tx, id).await?;
    require_instructor_of_module(&mut *tx, session.user_id(), current.module_id).await?;
    if let Some(module_id) = payload.module_id.filter(|module_id| *module_id != current.module_id) {
        require_instructor_of_module(&mut *tx, session.user_id(), module_id).await?;
    }

    let changes = AssessmentChanges {
        module_id: payload.module_id,
        kind: payload.kind,
    };
    let assessment = store::update_assessment(&mut *tx, id, &changes).await?;
    let key_cleared = assessment.kind == AssessmentType::Essay
        && current.kind != AssessmentType::Essay
        && store::clear_detail_answer(&mut *tx, id).await?;
    tx.commit().await?;

    if payload.kind.is_some_and(|kind| kind != current.kind) {
        tracing::warn!(assessment_id = id, from = ?current.kind, to = ?assessment.kind, key_cleared, "Assessment type changed");
    }
    ApiResponse::with("Assessment updated", &assessment)
}

async fn delete_assessment(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    let current = load_scoped(&mut *tx, id).await?;
    require_instructor_of_module(&mut *tx, session.user_id(), current.module_id).await?;
    store::delete_assessment(&mut *tx, id)
        .await
        .map_err(|e| conflict_on_reference(e, "Assessment already has submissions"))?;
    tx.commit().await?;

    tracing::info!(assessment_id = id, user_id = session.user_id(), "Assessment deleted");
    Ok(ApiResponse::message("Assessment deleted"))
}

/// Field checks shared by detail create and update.
fn check_detail(
    kind: AssessmentType,
    title: &str,
    question: &QuestionMap,
    answer: Option<&AnswerKey>,
) -> AppResult<()> {
    let mut errors = FieldErrors::new();
    errors.check(valid_length(title, 1, 100), "title", "Title must be 1 to 100 characters");
    errors.check(!question.is_empty(), "question", "At least one question is required");
    match (kind, answer) {
        (AssessmentType::Choices, None) => {
            errors.add("answer", "An answer key is required for choices assessments");
        }
        (AssessmentType::Choices, Some(key)) => {
            for question_id in uncovered_questions(question, key) {
                errors.add("answer", format!("No answer for question {question_id}"));
            }
        }
        (AssessmentType::Essay, Some(_)) => {
            errors.add("answer", "Essay assessments take no answer key");
        }
        (AssessmentType::Essay, None) => {}
    }
    errors.into_result()
}

async fn create_detail(
    State(state): State<SharedState>,
    session: UserSession,
    Path(assessment_id): Path<i64>,
    JsonBody(payload): JsonBody<CreateDetail>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    let assessment = load_scoped(&mut *tx, assessment_id).await?;
    require_instructor_of_module(&mut *tx, session.user_id(), assessment.module_id).await?;
    check_detail(assessment.kind, &payload.title, &payload.question, payload.answer.as_ref())?;

    let detail = store::insert_detail(
        &mut *tx,
        &NewDetail {
            assessment_id,
            title: payload.title.trim(),
            question: &payload.question,
            answer: payload.answer.as_ref(),
            deadline: payload.deadline,
        },
    )
    .await
    .map_err(|e| conflict_on_unique(e, "Assessment already has a detail"))?;
    tx.commit().await?;

    tracing::info!(assessment_id, questions = detail.question.0.len(), deadline = %detail.deadline, "Assessment detail created");
    Ok(ApiResponse::with("Assessment detail created", &detail.into_view(true))?.created())
}

/// Instructors see the answer key; active students of the institute do not.
async fn get_detail(
    State(state): State<SharedState>,
    session: UserSession,
    Path(assessment_id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let assessment = load_scoped(&mut conn, assessment_id).await?;
    let grants = db::roles_for_user(&mut conn, session.user_id()).await?;

    let include_answer = if active_role_in(&grants, assessment.institute_id, RoleKind::Instructor).is_some() {
        true
    } else if active_role_in(&grants, assessment.institute_id, RoleKind::Student).is_some() {
        false
    } else {
        return Err(AppError::unauthorized_user());
    };

    let detail = store::find_detail(&mut conn, assessment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Assessment detail not found".to_string()))?;
    ApiResponse::with("Assessment detail", &detail.into_view(include_answer))
}

async fn update_detail(
    State(state): State<SharedState>,
    session: UserSession,
    Path(assessment_id): Path<i64>,
    JsonBody(payload): JsonBody<UpdateDetail>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    let assessment = load_scoped(&mut *tx, assessment_id).await?;
    require_instructor_of_module(&mut *tx, session.user_id(), assessment.module_id).await?;
    let current = store::find_detail(&mut *tx, assessment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Assessment detail not found".to_string()))?;

    let updated = apply_detail_update(assessment.kind, current, payload);
    check_detail(
        assessment.kind,
        &updated.title,
        &updated.question.0,
        updated.answer_key(),
    )?;
    let saved = store::save_detail(&mut *tx, &updated).await?;
    tx.commit().await?;

    tracing::info!(assessment_id, "Assessment detail updated");
    ApiResponse::with("Assessment detail updated", &saved.into_view(true))
}

/// An essay detail never keeps a stored key unless the update sends one,
/// which `check_detail` then rejects.
fn apply_detail_update(kind: AssessmentType, mut detail: AssessmentDetail, update: UpdateDetail) -> AssessmentDetail {
    if let Some(title) = update.title {
        detail.title = title.trim().to_string();
    }
    if let Some(question) = update.question {
        detail.question = sqlx::types::Json(question);
    }
    match update.answer {
        Some(answer) => detail.answer = answer.map(sqlx::types::Json),
        None if kind == AssessmentType::Essay => detail.answer = None,
        None => {}
    }
    if let Some(deadline) = update.deadline {
        detail.deadline = deadline;
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn choices_detail_needs_a_covering_key() {
        let question = map(json!({ "1": ["A", "B"], "2": ["A", "B"] }));
        let partial = map(json!({ "1": "A" }));
        let full = map(json!({ "1": "A", "2": "B" }));

        assert!(check_detail(AssessmentType::Choices, "Quiz", &question, None).is_err());
        match check_detail(AssessmentType::Choices, "Quiz", &question, Some(&partial)) {
            Err(AppError::Validation { data: Some(data), .. }) => {
                assert_eq!(data["answer"][0], "No answer for question 2");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_detail(AssessmentType::Choices, "Quiz", &question, Some(&full)).is_ok());
    }

    #[test]
    fn essay_detail_takes_no_key() {
        let question = map(json!({ "prompt": "Describe ownership" }));
        assert!(check_detail(AssessmentType::Essay, "Essay", &question, None).is_ok());
        assert!(check_detail(AssessmentType::Essay, "Essay", &question, Some(&map(json!({ "prompt": "x" })))).is_err());
    }

    #[test]
    fn title_and_questions_are_required() {
        let empty = Map::new();
        assert!(check_detail(AssessmentType::Essay, "Essay", &empty, None).is_err());
        let question = map(json!({ "1": "?" }));
        assert!(check_detail(AssessmentType::Essay, "", &question, None).is_err());
        assert!(check_detail(AssessmentType::Essay, &"x".repeat(101), &question, None).is_err());
    }

    #[test]
    fn detail_update_rejects_unknown_fields() {
        let parsed: Result<UpdateDetail, _> = serde_json::from_str(r#"{"title":"x","assessment_id":9}"#);
        assert!(parsed.is_err());

        let parsed: UpdateDetail = serde_json::from_str(r#"{"deadline":"2031-01-01T10:00:00"}"#).unwrap();
        assert!(parsed.deadline.is_some());
        assert!(parsed.title.is_none());
    }

    #[test]
    fn update_touches_only_given_fields() {
        let now = Utc::now();
        let detail = AssessmentDetail {
            id: 1,
            assessment_id: 2,
            title: "Old".to_string(),
            question: sqlx::types::Json(map(json!({ "1": ["A"] }))),
            answer: Some(sqlx::types::Json(map(json!({ "1": "A" })))),
            deadline: now,
            created_at: now,
            updated_at: now,
        };
        let update: UpdateDetail = serde_json::from_str(r#"{"title":" New "}"#).unwrap();
        let updated = apply_detail_update(AssessmentType::Choices, detail, update);
        assert_eq!(updated.title, "New");
        assert_eq!(updated.deadline, now);
        assert_eq!(updated.answer_key().and_then(|key| key.get("1")), Some(&json!("A")));
    }

    fn keyed_detail(now: DateTime<Utc>) -> AssessmentDetail {
        AssessmentDetail {
            id: 1,
            assessment_id: 2,
            title: "Quiz".to_string(),
            question: sqlx::types::Json(map(json!({ "1": ["A", "B"] }))),
            answer: Some(sqlx::types::Json(map(json!({ "1": "A" })))),
            deadline: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn deadline_update_on_essay_drops_stale_key() {
        let now = Utc::now();
        let update: UpdateDetail = serde_json::from_str(r#"{"deadline":"2031-01-01T10:00:00"}"#).unwrap();
        let updated = apply_detail_update(AssessmentType::Essay, keyed_detail(now), update);

        assert!(updated.answer_key().is_none());
        assert_ne!(updated.deadline, now);
        assert!(check_detail(AssessmentType::Essay, &updated.title, &updated.question.0, updated.answer_key()).is_ok());
    }

    #[test]
    fn explicit_null_answer_clears_the_key() {
        let cleared: UpdateDetail = serde_json::from_str(r#"{"answer":null}"#).unwrap();
        assert!(matches!(cleared.answer, Some(None)));
        let absent: UpdateDetail = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert!(absent.answer.is_none());

        let now = Utc::now();
        let updated = apply_detail_update(AssessmentType::Choices, keyed_detail(now), cleared);
        assert!(updated.answer_key().is_none());
        assert!(check_detail(AssessmentType::Choices, &updated.title, &updated.question.0, updated.answer_key()).is_err());
    }

    #[test]
    fn essay_update_sending_a_key_is_rejected() {
        let update: UpdateDetail = serde_json::from_str(r#"{"answer":{"1":"A"}}"#).unwrap();
        let updated = apply_detail_update(AssessmentType::Essay, keyed_detail(Utc::now()), update);
        assert!(check_detail(AssessmentType::Essay, &updated.title, &updated.question.0, updated.answer_key()).is_err());
    }
}
