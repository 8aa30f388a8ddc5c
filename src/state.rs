use crate::config::{AppConfig, FileStoreConfig};
use crate::services::file_store::{FileStore, HttpFileStore, LocalFileStore};
use chrono::Duration;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub session_key: Vec<u8>,
    pub token_ttl: Duration,
    pub file_store: Arc<dyn FileStore>,
    pub upload_timeout: std::time::Duration,
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(pool: PgPool, config: &AppConfig) -> Self {
        let file_store: Arc<dyn FileStore> = match &config.file_store {
            FileStoreConfig::Local { dir, public_base } => {
                Arc::new(LocalFileStore::new(dir.clone(), public_base.clone()))
            }
            FileStoreConfig::Http {
                endpoint,
                token,
                public_base,
            } => Arc::new(HttpFileStore::new(endpoint.clone(), token.clone(), public_base.clone())),
        };

        Self {
            pool,
            session_key: config.session_key.clone(),
            token_ttl: Duration::hours(config.token_ttl_hours),
            file_store,
            upload_timeout: config.upload_timeout,
            secure_cookies: config.production,
        }
    }
}

pub type SharedState = Arc<AppState>;
