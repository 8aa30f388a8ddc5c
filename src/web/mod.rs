pub mod assessments;
pub mod auth;
pub mod courses;
pub mod enrollments;
pub mod institutes;
pub mod response;
pub mod session;
pub mod submissions;

use crate::state::SharedState;
use axum::{routing::get, Router};

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    let api = Router::new()
        .nest("/auth", auth::router(state.clone()))
        .nest("/users", auth::users_router(state.clone()))
        .nest("/institutes", institutes::router(state.clone()))
        .nest("/courses", courses::courses_router(state.clone()))
        .nest("/modules", courses::modules_router(state.clone()))
        .nest("/enrollments", enrollments::router(state.clone()))
        .nest(
            "/assessments",
            assessments::router(state.clone()).merge(submissions::assessment_router(state.clone())),
        )
        .nest("/assessments_details", assessments::details_router(state.clone()))
        .nest("/assessment_details", assessments::detail_updates_router(state.clone()))
        .nest("/submissions", submissions::router(state));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
}
