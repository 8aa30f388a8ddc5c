use crate::db::{self, catalog};
use crate::db::catalog::Enrollment;
use crate::domain::models::{holds_active_role, EnrollmentStatus, RoleKind};
use crate::error::{conflict_on_unique, AppError, AppResult};
use crate::services::access::{self, STAFF};
use crate::state::SharedState;
use crate::web::response::{ApiResponse, JsonBody};
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgConnection;

#[derive(Deserialize)]
pub struct CreateEnrollment {
    pub role_id: i64,
    pub course_id: i64,
}

#[derive(Deserialize)]
pub struct EnrollmentStatusUpdate {
    pub status: EnrollmentStatus,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_enrollments).post(create_enrollment))
        .route("/:id", get(get_enrollment).patch(update_enrollment))
        .with_state(state)
}

async fn course_institute(conn: &mut PgConnection, course_id: i64) -> AppResult<i64> {
    catalog::find_course(conn, course_id)
        .await?
        .map(|course| course.institute_id)
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))
}

async fn load_enrollment(conn: &mut PgConnection, id: i64) -> AppResult<Enrollment> {
    catalog::find_enrollment(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Enrollment not found".to_string()))
}

async fn create_enrollment(
    State(state): State<SharedState>,
    session: UserSession,
    JsonBody(payload): JsonBody<CreateEnrollment>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    let institute_id = course_institute(&mut *tx, payload.course_id).await?;
    access::require_role(&mut *tx, session.user_id(), institute_id, RoleKind::Admin).await?;

    let learner = db::find_role(&mut *tx, payload.role_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Role not found".to_string()))?;
    if learner.institute_id != institute_id {
        return Err(AppError::validation_with(
            "Validation error",
            json!({ "role_id": ["Role belongs to another institute"] }),
        ));
    }

    let enrollment = catalog::insert_enrollment(&mut *tx, learner.id, payload.course_id)
        .await
        .map_err(|e| conflict_on_unique(e, "Role already enrolled in this course"))?;
    tx.commit().await?;

    tracing::info!(enrollment_id = enrollment.id, role_id = learner.id, course_id = payload.course_id, "Enrollment created");
    Ok(ApiResponse::with("Enrollment created", &enrollment)?.created())
}

async fn list_enrollments(State(state): State<SharedState>, session: UserSession) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let enrollments = catalog::list_visible_enrollments(&mut conn, session.user_id()).await?;
    ApiResponse::list("Enrollments", "enrollments", &enrollments)
}

/// Visible to the enrolled role's owner and to staff of the course's institute.
async fn get_enrollment(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let enrollment = load_enrollment(&mut conn, id).await?;
    let institute_id = course_institute(&mut conn, enrollment.course_id).await?;

    let grants = db::roles_for_user(&mut conn, session.user_id()).await?;
    let owns = grants.iter().any(|grant| grant.role_id == enrollment.role_id);
    if !owns && !holds_active_role(&grants, institute_id, STAFF) {
        return Err(AppError::unauthorized_user());
    }
    ApiResponse::with("Enrollment", &enrollment)
}

async fn update_enrollment(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<EnrollmentStatusUpdate>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    let enrollment = load_enrollment(&mut *tx, id).await?;
    let institute_id = course_institute(&mut *tx, enrollment.course_id).await?;
    access::require_role(&mut *tx, session.user_id(), institute_id, RoleKind::Admin).await?;
    let enrollment = catalog::update_enrollment_status(&mut *tx, id, payload.status).await?;
    tx.commit().await?;

    tracing::info!(enrollment_id = id, status = ?enrollment.status, "Enrollment updated");
    ApiResponse::with("Enrollment updated", &enrollment)
}
