use lms_backend::config::{AppConfig, FileStoreConfig};
use lms_backend::state::{AppState, SharedState};
use lms_backend::{app, db};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;
    tracing::info!("Database migrations completed");

    let shared: SharedState = Arc::new(AppState::new(pool, &config));

    let scheduler = JobScheduler::new().await?;

    // Revoked-token cleanup - hourly
    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                match db::purge_expired_tokens(&state.pool).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!("Purged {} expired revoked tokens", purged),
                    Err(e) => tracing::error!("Failed to purge revoked tokens: {}", e),
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started: revoked-token cleanup hourly");

    let mut router = app(shared.clone());
    if let FileStoreConfig::Local { dir, .. } = &config.file_store {
        tokio::fs::create_dir_all(dir).await?;
        router = router.nest_service("/uploads", ServeDir::new(dir));
        tracing::info!("Serving local uploads from {}", dir);
    }

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
