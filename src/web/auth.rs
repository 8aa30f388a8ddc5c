use crate::db::{self, UserChanges, UserProfile};
use crate::error::{conflict_on_unique, AppError, AppResult};
use crate::state::SharedState;
use crate::web::response::{looks_like_email, valid_length, ApiResponse, FieldErrors, JsonBody};
use crate::web::session::{self, UserSession};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rand_core::OsRng;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub profile_pict: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .with_state(state)
}

pub fn users_router(state: SharedState) -> Router {
    Router::new()
        .route("/profile", get(profile).patch(update_profile))
        .route("/logout", post(logout))
        .with_state(state)
}

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
        .to_string();
    Ok(hash)
}

fn password_matches(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

async fn register(
    State(state): State<SharedState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<ApiResponse> {
    let mut errors = FieldErrors::new();
    errors.check(valid_length(&payload.name, 3, 50), "name", "Name must be 3 to 50 characters");
    errors.check(looks_like_email(&payload.email), "email", "Invalid email address");
    errors.check(payload.password.chars().count() >= 8, "password", "Password must be at least 8 characters");
    errors.into_result()?;

    let password_hash = hash_password(&payload.password)?;
    let email = payload.email.trim().to_lowercase();

    let mut tx = state.pool.begin().await?;
    let user = db::insert_user(
        &mut *tx,
        payload.name.trim(),
        &email,
        &password_hash,
        payload.profile_pict.as_deref(),
    )
    .await
    .map_err(|e| conflict_on_unique(e, "Email already registered"))?;
    tx.commit().await?;

    tracing::info!(user_id = user.id, "User registered");
    Ok(ApiResponse::with("User registered", &UserProfile::from(user))?.created())
}

async fn login(
    State(state): State<SharedState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let mut conn = state.pool.acquire().await?;
    let user = db::find_user_by_email(&mut conn, &payload.email.trim().to_lowercase())
        .await?
        .ok_or_else(invalid)?;
    if !password_matches(&payload.password, &user.password_hash) {
        tracing::warn!(user_id = user.id, "Failed login attempt");
        return Err(invalid());
    }

    let roles = db::memberships_for_user(&mut conn, user.id).await?;
    let (token, _claims) = session::sign_session(user.id, state.token_ttl, &state.session_key)
        .map_err(|e| anyhow::anyhow!("failed to sign session: {e}"))?;

    let cookie = session::session_cookie(&token, state.token_ttl, state.secure_cookies);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(anyhow::Error::from)?,
    );

    let body = ApiResponse::with(
        "Login successful",
        &json!({
            "token": token,
            "user": UserProfile::from(user),
            "roles": roles,
        }),
    )?;
    Ok((headers, body))
}

async fn logout(State(state): State<SharedState>, session: UserSession) -> AppResult<impl IntoResponse> {
    let mut conn = state.pool.acquire().await?;
    db::revoke_token(&mut conn, session.0.jti, session.0.expires_at()).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0"),
    );
    tracing::info!(user_id = session.user_id(), "User logged out");
    Ok((headers, ApiResponse::message("Logged out")))
}

async fn profile(State(state): State<SharedState>, session: UserSession) -> AppResult<ApiResponse> {
    let mut conn = state.pool.acquire().await?;
    let user = db::find_user_by_id(&mut conn, session.user_id())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    ApiResponse::with("Profile", &UserProfile::from(user))
}

async fn update_profile(
    State(state): State<SharedState>,
    session: UserSession,
    JsonBody(payload): JsonBody<ProfileUpdate>,
) -> AppResult<ApiResponse> {
    let mut errors = FieldErrors::new();
    if let Some(name) = &payload.name {
        errors.check(valid_length(name, 3, 50), "name", "Name must be 3 to 50 characters");
    }
    if let Some(email) = &payload.email {
        errors.check(looks_like_email(email), "email", "Invalid email address");
    }
    if let Some(password) = &payload.password {
        errors.check(password.chars().count() >= 8, "password", "Password must be at least 8 characters");
    }
    errors.into_result()?;

    let changes = UserChanges {
        name: payload.name.map(|name| name.trim().to_string()),
        email: payload.email.map(|email| email.trim().to_lowercase()),
        password_hash: payload.password.as_deref().map(hash_password).transpose()?,
    };

    let mut tx = state.pool.begin().await?;
    let user = db::update_user(&mut *tx, session.user_id(), &changes)
        .await
        .map_err(|e| conflict_on_unique(e, "Email already registered"))?;
    tx.commit().await?;

    ApiResponse::with("Profile updated", &UserProfile::from(user))
}
