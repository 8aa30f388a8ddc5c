use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;

/// Where submission attachments end up.
#[derive(Debug, Clone)]
pub enum FileStoreConfig {
    Local { dir: String, public_base: String },
    Http {
        endpoint: String,
        token: Option<String>,
        public_base: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: String,
    pub session_key: Vec<u8>,
    pub token_ttl_hours: i64,
    pub upload_timeout: Duration,
    pub file_store: FileStoreConfig,
    pub production: bool,
}

impl AppConfig {
    /// Reads configuration from the process environment (after `.env`).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = get("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL missing"))?;

        let session_key_b64 = get("SESSION_KEY").ok_or_else(|| anyhow!("SESSION_KEY missing"))?;
        let session_key = general_purpose::STANDARD
            .decode(session_key_b64.trim())
            .context("SESSION_KEY must be base64")?;
        if session_key.len() < 32 {
            return Err(anyhow!("SESSION_KEY must decode to at least 32 bytes"));
        }

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| {
            let port = get("PORT").unwrap_or_else(|| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        let max_connections = parse_or(&get, "DB_MAX_CONNECTIONS", 10)?;
        let token_ttl_hours = parse_or(&get, "TOKEN_TTL_HOURS", 8)?;
        let upload_timeout = Duration::from_secs(parse_or(&get, "UPLOAD_TIMEOUT_SECS", 30)?);

        let public_base = get("PUBLIC_BASE_URL").unwrap_or_else(|| format!("http://{}", bind_addr));
        let file_store = match get("FILE_STORE_ENDPOINT") {
            Some(endpoint) => FileStoreConfig::Http {
                public_base: get("FILE_STORE_PUBLIC_URL").unwrap_or_else(|| endpoint.clone()),
                token: get("FILE_STORE_TOKEN"),
                endpoint,
            },
            None => FileStoreConfig::Local {
                dir: get("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()),
                public_base,
            },
        };

        let production = get("PRODUCTION").is_some();

        Ok(Self {
            database_url,
            max_connections,
            bind_addr,
            session_key,
            token_ttl_hours,
            upload_timeout,
            file_store,
            production,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} is invalid: {}", key, e)),
        None => Ok(default),
    }
}
