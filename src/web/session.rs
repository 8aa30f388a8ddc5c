use crate::db;
use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub jti: Uuid,
    pub user_id: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
}

pub fn sign_session(user_id: i64, ttl: Duration, key: &[u8]) -> Result<(String, SessionClaims), SessionError> {
    let claims = SessionClaims {
        jti: Uuid::new_v4(),
        user_id,
        exp: (Utc::now() + ttl).timestamp(),
    };
    let payload = format!("{}|{}|{}", claims.jti, claims.user_id, claims.exp);
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    let token = format!(
        "{}.{}",
        general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        general_purpose::URL_SAFE_NO_PAD.encode(sig)
    );
    Ok((token, claims))
}

pub fn verify_session(token: &str, key: &[u8]) -> Result<SessionClaims, SessionError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionError::Invalid)?;
    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes).map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    let pieces: Vec<&str> = payload.split('|').collect();
    let [jti, user_id, exp] = pieces.as_slice() else {
        return Err(SessionError::Invalid);
    };
    let jti = Uuid::parse_str(jti).map_err(|_| SessionError::Invalid)?;
    let user_id: i64 = user_id.parse().map_err(|_| SessionError::Invalid)?;
    let exp: i64 = exp.parse().map_err(|_| SessionError::Invalid)?;
    if Utc::now().timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims { jti, user_id, exp })
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(val) = auth.to_str() {
            if let Some(bearer) = val.strip_prefix("Bearer ") {
                return Some(bearer.trim().to_string());
            }
        }
    }
    if let Some(cookie) = headers.get(axum::http::header::COOKIE) {
        if let Ok(val) = cookie.to_str() {
            for pair in val.split(';') {
                let trimmed = pair.trim();
                if let Some(rest) = trimmed.strip_prefix("session=") {
                    return Some(rest.to_string());
                }
            }
        }
    }
    None
}

pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "session={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        ttl.num_seconds(),
        secure_flag
    )
}

// ============================================
// Axum extractor for authenticated callers
// ============================================

/// An authenticated, non-revoked session.
///
/// ```ignore
/// async fn handler(session: UserSession) -> AppResult<...> {
///     let user_id = session.user_id();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct UserSession(pub SessionClaims);

impl UserSession {
    pub fn user_id(&self) -> i64 {
        self.0.user_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    S: Send + Sync,
    crate::state::SharedState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared_state = crate::state::SharedState::from_ref(state);

        let token = extract_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Request doesn't contain valid token".to_string()))?;

        let claims = verify_session(&token, &shared_state.session_key).map_err(|e| {
            tracing::warn!("Session verification failed: {}", e);
            match e {
                SessionError::Expired => AppError::Unauthorized("Token has expired".to_string()),
                _ => AppError::Unauthorized("Request doesn't contain valid token".to_string()),
            }
        })?;

        if db::is_token_revoked(&shared_state.pool, claims.jti).await? {
            return Err(AppError::Unauthorized("Token has been revoked".to_string()));
        }

        let mut conn = shared_state.pool.acquire().await?;
        if db::find_user_by_id(&mut conn, claims.user_id).await?.is_none() {
            return Err(AppError::Unauthorized("User no longer exists".to_string()));
        }

        Ok(UserSession(claims))
    }
}
