use crate::db;
use crate::domain::models::{RoleKind, RoleStatus};
use crate::error::{conflict_on_reference, conflict_on_unique, AppError, AppResult};
use crate::services::access;
use crate::state::SharedState;
use crate::web::response::{valid_length, ApiResponse, FieldErrors, JsonBody};
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct InstitutePayload {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AssignRole {
    pub user_id: i64,
    pub role: RoleKind,
}

#[derive(Deserialize)]
pub struct RoleStatusUpdate {
    pub status: RoleStatus,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_institutes).post(create_institute))
        .route(
            "/:id",
            get(get_institute).patch(rename_institute).delete(delete_institute),
        )
        .route("/:id/roles", get(list_roles).post(assign_role))
        .route("/:id/roles/:role_id", patch(update_role_status))
        .with_state(state)
}

fn check_name(name: &str) -> AppResult<()> {
    let mut errors = FieldErrors::new();
    errors.check(valid_length(name, 3, 100), "name", "Name must be 3 to 100 characters");
    errors.into_result()
}

/// Creates the institute and makes the caller its active admin.
async fn create_institute(
    State(state): State<SharedState>,
    session: UserSession,
    JsonBody(payload): JsonBody<InstitutePayload>,
) -> AppResult<ApiResponse> {
    check_name(&payload.name)?;

    let mut tx = state.pool.begin().await?;
    let institute = db::insert_institute(&mut *tx, payload.name.trim())
        .await
        .map_err(|e| conflict_on_unique(e, "Institute name already taken"))?;
    let role = db::insert_role(
        &mut *tx,
        institute.id,
        session.user_id(),
        RoleKind::Admin,
        RoleStatus::Active,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(institute_id = institute.id, user_id = session.user_id(), "Institute created");
    Ok(ApiResponse::with("Institute created", &json!({ "institute": institute, "role": role }))?.created())
}

async fn list_institutes(State(state): State<SharedState>, _session: UserSession) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let institutes = db::list_institutes(&mut conn).await?;
    ApiResponse::list("Institutes", "institutes", &institutes)
}

async fn get_institute(
    State(state): State<SharedState>,
    _session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let institute = db::find_institute(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Institute not found".to_string()))?;
    ApiResponse::with("Institute", &institute)
}

async fn rename_institute(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<InstitutePayload>,
) -> AppResult<ApiResponse> {
    check_name(&payload.name)?;

    let mut tx = state.pool.begin().await?;
    ensure_institute(&mut *tx, id).await?;
    access::require_role(&mut *tx, session.user_id(), id, RoleKind::Admin).await?;
    let institute = db::rename_institute(&mut *tx, id, payload.name.trim())
        .await
        .map_err(|e| conflict_on_unique(e, "Institute name already taken"))?;
    tx.commit().await?;

    ApiResponse::with("Institute updated", &institute)
}

async fn delete_institute(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    ensure_institute(&mut *tx, id).await?;
    access::require_role(&mut *tx, session.user_id(), id, RoleKind::Admin).await?;
    db::delete_institute(&mut *tx, id)
        .await
        .map_err(|e| conflict_on_reference(e, "Institute still has assessments or submissions"))?;
    tx.commit().await?;

    tracing::info!(institute_id = id, user_id = session.user_id(), "Institute deleted");
    Ok(ApiResponse::message("Institute deleted"))
}

async fn list_roles(
    State(state): State<SharedState>,
    _session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    ensure_institute(&mut conn, id).await?;
    let roles = db::list_institute_roles(&mut conn, id).await?;
    ApiResponse::list("Roles", "roles", &roles)
}

/// Admins hand out instructor and student roles; they start `pending`.
async fn assign_role(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<AssignRole>,
) -> AppResult<ApiResponse> {
    if payload.role == RoleKind::Admin {
        return Err(AppError::validation_with(
            "Validation error",
            json!({ "role": ["Role must be instructor or student"] }),
        ));
    }

    let mut tx = state.pool.begin().await?;
    ensure_institute(&mut *tx, id).await?;
    access::require_role(&mut *tx, session.user_id(), id, RoleKind::Admin).await?;
    if db::find_user_by_id(&mut *tx, payload.user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    let role = db::insert_role(&mut *tx, id, payload.user_id, payload.role, RoleStatus::Pending)
        .await
        .map_err(|e| conflict_on_unique(e, "User already holds this role"))?;
    tx.commit().await?;

    tracing::info!(institute_id = id, role_id = role.id, user_id = payload.user_id, "Role assigned");
    Ok(ApiResponse::with("Role assigned", &role)?.created())
}

async fn update_role_status(
    State(state): State<SharedState>,
    session: UserSession,
    Path((id, role_id)): Path<(i64, i64)>,
    JsonBody(payload): JsonBody<RoleStatusUpdate>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    access::require_role(&mut *tx, session.user_id(), id, RoleKind::Admin).await?;
    let role = db::find_role(&mut *tx, role_id)
        .await?
        .filter(|role| role.institute_id == id)
        .ok_or_else(|| AppError::NotFound("Role not found".to_string()))?;
    let role = db::update_role_status(&mut *tx, role.id, payload.status).await?;
    tx.commit().await?;

    tracing::info!(institute_id = id, role_id, status = ?role.status, "Role status changed");
    ApiResponse::with("Role updated", &role)
}

async fn ensure_institute(conn: &mut sqlx::PgConnection, id: i64) -> AppResult<()> {
    db::find_institute(conn, id)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Institute not found".to_string()))
}
