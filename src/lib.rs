pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod services;
pub mod state;
pub mod time_utils;
pub mod web;

use crate::state::SharedState;
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// The HTTP application: API routes plus request tracing and CORS.
pub fn app(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    web::routes(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
