use crate::db::{self, assessments, catalog};
use crate::db::catalog::{Course, ModuleChanges, NewCourse};
use crate::domain::models::{holds_active_role, RoleKind};
use crate::error::{conflict_on_reference, AppError, AppResult};
use crate::services::access::{self, STAFF};
use crate::state::SharedState;
use crate::web::response::{valid_length, ApiResponse, FieldErrors, JsonBody};
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use sqlx::PgConnection;

#[derive(Deserialize)]
pub struct CreateCourse {
    pub institute_id: i64,
    pub role_id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub media: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateModule {
    pub course_id: i64,
    pub title: String,
    pub content: String,
    pub module_file: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateModule {
    pub title: Option<String>,
    pub content: Option<String>,
    pub module_file: Option<String>,
}

pub fn courses_router(state: SharedState) -> Router {
    Router::new()
        .route("/", post(create_course))
        .route("/:id", get(get_course))
        .route("/:id/modules", get(list_course_modules))
        .with_state(state)
}

pub fn modules_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_modules).post(create_module))
        .route("/:id", get(get_module).patch(update_module).delete(delete_module))
        .route("/:id/assessments", get(list_module_assessments))
        .with_state(state)
}

async fn create_course(
    State(state): State<SharedState>,
    session: UserSession,
    JsonBody(payload): JsonBody<CreateCourse>,
) -> AppResult<ApiResponse> {
    let mut errors = FieldErrors::new();
    errors.check(valid_length(&payload.title, 1, 255), "title", "Title must be 1 to 255 characters");
    errors.check(!payload.description.trim().is_empty(), "description", "Description is required");
    errors.check(valid_length(&payload.category, 1, 255), "category", "Category must be 1 to 255 characters");
    errors.into_result()?;

    let mut tx = state.pool.begin().await?;
    if db::find_institute(&mut *tx, payload.institute_id).await?.is_none() {
        return Err(AppError::NotFound("Institute not found".to_string()));
    }
    let owner = db::find_role(&mut *tx, payload.role_id)
        .await?
        .map(|role| role.grant())
        .filter(|grant| grant.user_id == session.user_id())
        .filter(|grant| holds_active_role(&[*grant], payload.institute_id, STAFF))
        .ok_or_else(AppError::unauthorized_user)?;

    let course = catalog::insert_course(
        &mut *tx,
        &NewCourse {
            institute_id: payload.institute_id,
            role_id: owner.role_id,
            title: payload.title.trim(),
            description: &payload.description,
            category: payload.category.trim(),
            media: payload.media.as_deref(),
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(course_id = course.id, institute_id = course.institute_id, "Course created");
    Ok(ApiResponse::with("Course created", &course)?.created())
}

/// Staff of the institute, or a student enrolled in the course.
async fn require_member(conn: &mut PgConnection, user_id: i64, course: &Course) -> AppResult<()> {
    let grants = db::roles_for_user(conn, user_id).await?;
    if holds_active_role(&grants, course.institute_id, STAFF) {
        return Ok(());
    }
    let student_roles: Vec<i64> = grants
        .iter()
        .filter(|grant| grant.institute_id == course.institute_id && grant.is_active(RoleKind::Student))
        .map(|grant| grant.role_id)
        .collect();
    if !student_roles.is_empty() && catalog::is_enrolled(conn, &student_roles, course.id).await? {
        return Ok(());
    }
    Err(AppError::unauthorized_user())
}

async fn load_course(conn: &mut PgConnection, id: i64) -> AppResult<Course> {
    catalog::find_course(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))
}

async fn get_course(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let course = load_course(&mut conn, id).await?;
    require_member(&mut conn, session.user_id(), &course).await?;
    ApiResponse::with("Course", &course)
}

async fn list_course_modules(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let course = load_course(&mut conn, id).await?;
    require_member(&mut conn, session.user_id(), &course).await?;
    let modules = catalog::list_course_modules(&mut conn, course.id).await?;
    ApiResponse::list("Modules", "modules", &modules)
}

async fn create_module(
    State(state): State<SharedState>,
    session: UserSession,
    JsonBody(payload): JsonBody<CreateModule>,
) -> AppResult<ApiResponse> {
    let mut errors = FieldErrors::new();
    errors.check(valid_length(&payload.title, 1, 255), "title", "Title must be 1 to 255 characters");
    errors.check(!payload.content.trim().is_empty(), "content", "Content is required");
    errors.into_result()?;

    let mut tx = state.pool.begin().await?;
    let course = load_course(&mut *tx, payload.course_id).await?;
    access::require_role(&mut *tx, session.user_id(), course.institute_id, RoleKind::Instructor).await?;
    let module = catalog::insert_module(
        &mut *tx,
        course.id,
        payload.title.trim(),
        &payload.content,
        payload.module_file.as_deref(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(module_id = module.id, course_id = course.id, "Module created");
    Ok(ApiResponse::with("Module created", &module)?.created())
}

async fn get_module(
    State(state): State<SharedState>,
    _session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let module = catalog::find_module(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Module not found".to_string()))?;
    ApiResponse::with("Module", &module)
}

async fn update_module(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<UpdateModule>,
) -> AppResult<ApiResponse> {
    let mut errors = FieldErrors::new();
    if let Some(title) = &payload.title {
        errors.check(valid_length(title, 1, 255), "title", "Title must be 1 to 255 characters");
    }
    if let Some(content) = &payload.content {
        errors.check(!content.trim().is_empty(), "content", "Content must not be empty");
    }
    errors.into_result()?;

    let mut tx = state.pool.begin().await?;
    let institute_id = access::module_institute(&mut *tx, id).await?;
    access::require_role(&mut *tx, session.user_id(), institute_id, RoleKind::Instructor).await?;
    let changes = ModuleChanges {
        title: payload.title.map(|title| title.trim().to_string()),
        content: payload.content,
        module_file: payload.module_file,
    };
    let module = catalog::update_module(&mut *tx, id, &changes).await?;
    tx.commit().await?;

    ApiResponse::with("Module updated", &module)
}

async fn delete_module(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut tx = state.pool.begin().await?;
    let institute_id = access::module_institute(&mut *tx, id).await?;
    access::require_role(&mut *tx, session.user_id(), institute_id, RoleKind::Instructor).await?;
    catalog::delete_module(&mut *tx, id)
        .await
        .map_err(|e| conflict_on_reference(e, "Module still has assessments"))?;
    tx.commit().await?;

    tracing::info!(module_id = id, user_id = session.user_id(), "Module deleted");
    Ok(ApiResponse::message("Module deleted"))
}

async fn list_modules(State(state): State<SharedState>, session: UserSession) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let modules = catalog::list_visible_modules(&mut conn, session.user_id()).await?;
    ApiResponse::list("Modules", "modules", &modules)
}

pub(crate) async fn list_module_assessments(
    State(state): State<SharedState>,
    _session: UserSession,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    if catalog::find_module(&mut conn, id).await?.is_none() {
        return Err(AppError::NotFound("Module not found".to_string()));
    }
    let assessments = assessments::list_module_assessments(&mut conn, id).await?;
    ApiResponse::list("Assessments", "assessments", &assessments)
}
