pub mod assessments;
pub mod catalog;
pub mod submissions;

use crate::domain::models::{RoleGrant, RoleKind, RoleStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub profile_pict: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a user; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub profile_pict: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbUser> for UserProfile {
    fn from(user: DbUser) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            profile_pict: user.profile_pict,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Institute {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub institute_id: i64,
    pub user_id: i64,
    pub role: RoleKind,
    pub status: RoleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn grant(&self) -> RoleGrant {
        RoleGrant {
            role_id: self.id,
            user_id: self.user_id,
            institute_id: self.institute_id,
            kind: self.role,
            status: self.status,
        }
    }
}

/// Role joined with its institute name, as returned at login.
#[derive(Debug, Serialize, FromRow)]
pub struct RoleMembership {
    pub role: RoleKind,
    pub role_id: i64,
    pub status: RoleStatus,
    pub institute_id: i64,
    pub institute_name: String,
}

const USER_COLUMNS: &str = "id, name, email, password_hash, profile_pict, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, institute_id, user_id, role, status, created_at, updated_at";

// ============================================
// Users
// ============================================

pub async fn find_user_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(user)
}

pub async fn find_user_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(user)
}

pub async fn insert_user(
    conn: &mut PgConnection,
    name: &str,
    email: &str,
    password_hash: &str,
    profile_pict: Option<&str>,
) -> std::result::Result<DbUser, sqlx::Error> {
    sqlx::query_as::<_, DbUser>(&format!(
        r#"
        INSERT INTO users (name, email, password_hash, profile_pict)
        VALUES ($1, $2, $3, $4)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(profile_pict)
    .fetch_one(&mut *conn)
    .await
}

#[derive(Debug, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

pub async fn update_user(
    conn: &mut PgConnection,
    id: i64,
    changes: &UserChanges,
) -> std::result::Result<DbUser, sqlx::Error> {
    sqlx::query_as::<_, DbUser>(&format!(
        r#"
        UPDATE users
        SET name = COALESCE($2, name),
            email = COALESCE($3, email),
            password_hash = COALESCE($4, password_hash),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(changes.name.as_deref())
    .bind(changes.email.as_deref())
    .bind(changes.password_hash.as_deref())
    .fetch_one(&mut *conn)
    .await
}

// ============================================
// Institutes
// ============================================

pub async fn insert_institute(
    conn: &mut PgConnection,
    name: &str,
) -> std::result::Result<Institute, sqlx::Error> {
    sqlx::query_as::<_, Institute>(
        "INSERT INTO institutes (name) VALUES ($1) RETURNING id, name, created_at, updated_at",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await
}

pub async fn list_institutes(conn: &mut PgConnection) -> Result<Vec<Institute>> {
    let rows = sqlx::query_as::<_, Institute>(
        "SELECT id, name, created_at, updated_at FROM institutes ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn find_institute(conn: &mut PgConnection, id: i64) -> Result<Option<Institute>> {
    let row = sqlx::query_as::<_, Institute>(
        "SELECT id, name, created_at, updated_at FROM institutes WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn rename_institute(
    conn: &mut PgConnection,
    id: i64,
    name: &str,
) -> std::result::Result<Institute, sqlx::Error> {
    sqlx::query_as::<_, Institute>(
        r#"
        UPDATE institutes SET name = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, name, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(name)
    .fetch_one(&mut *conn)
    .await
}

pub async fn delete_institute(conn: &mut PgConnection, id: i64) -> std::result::Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM institutes WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

// ============================================
// Roles (identity & role directory)
// ============================================

pub async fn insert_role(
    conn: &mut PgConnection,
    institute_id: i64,
    user_id: i64,
    kind: RoleKind,
    status: RoleStatus,
) -> std::result::Result<Role, sqlx::Error> {
    sqlx::query_as::<_, Role>(&format!(
        r#"
        INSERT INTO roles (institute_id, user_id, role, status)
        VALUES ($1, $2, $3, $4)
        RETURNING {ROLE_COLUMNS}
        "#
    ))
    .bind(institute_id)
    .bind(user_id)
    .bind(kind)
    .bind(status)
    .fetch_one(&mut *conn)
    .await
}

pub async fn find_role(conn: &mut PgConnection, id: i64) -> Result<Option<Role>> {
    let role = sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(role)
}

/// Every role tuple held by a user, across institutes.
pub async fn roles_for_user(conn: &mut PgConnection, user_id: i64) -> Result<Vec<RoleGrant>> {
    let roles = sqlx::query_as::<_, Role>(&format!(
        "SELECT {ROLE_COLUMNS} FROM roles WHERE user_id = $1 ORDER BY id"
    ))
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(roles.iter().map(Role::grant).collect())
}

pub async fn memberships_for_user(conn: &mut PgConnection, user_id: i64) -> Result<Vec<RoleMembership>> {
    let rows = sqlx::query_as::<_, RoleMembership>(
        r#"
        SELECT r.role, r.id AS role_id, r.status, i.id AS institute_id, i.name AS institute_name
        FROM roles r
        JOIN institutes i ON i.id = r.institute_id
        WHERE r.user_id = $1
        ORDER BY r.id
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn list_institute_roles(conn: &mut PgConnection, institute_id: i64) -> Result<Vec<Role>> {
    let roles = sqlx::query_as::<_, Role>(&format!(
        "SELECT {ROLE_COLUMNS} FROM roles WHERE institute_id = $1 ORDER BY id"
    ))
    .bind(institute_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(roles)
}

pub async fn update_role_status(conn: &mut PgConnection, id: i64, status: RoleStatus) -> Result<Role> {
    let role = sqlx::query_as::<_, Role>(&format!(
        r#"
        UPDATE roles SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {ROLE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status)
    .fetch_one(&mut *conn)
    .await?;
    Ok(role)
}

// ============================================
// Token blocklist
// ============================================

pub async fn revoke_token(conn: &mut PgConnection, jti: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO revoked_tokens (jti, expires_at)
        VALUES ($1, $2)
        ON CONFLICT (jti) DO NOTHING
        "#,
    )
    .bind(jti)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn is_token_revoked(pool: &PgPool, jti: Uuid) -> Result<bool> {
    let revoked: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE jti = $1)")
        .bind(jti)
        .fetch_one(pool)
        .await?;
    Ok(revoked)
}

/// Drops blocklist rows whose tokens would be rejected as expired anyway.
pub async fn purge_expired_tokens(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < NOW()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
