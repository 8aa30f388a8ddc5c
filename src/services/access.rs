//! Role lookups for authorization checks.

use crate::db;
use crate::domain::models::{active_role_in, RoleGrant, RoleKind};
use crate::error::{AppError, AppResult};
use sqlx::PgConnection;

pub const STAFF: &[RoleKind] = &[RoleKind::Admin, RoleKind::Instructor];

/// The caller's active role of `kind` in `institute_id`, or `Forbidden`.
pub async fn require_role(
    conn: &mut PgConnection,
    user_id: i64,
    institute_id: i64,
    kind: RoleKind,
) -> AppResult<RoleGrant> {
    let grants = db::roles_for_user(conn, user_id).await?;
    active_role_in(&grants, institute_id, kind).ok_or_else(AppError::unauthorized_user)
}

/// Institute owning a module, or `NotFound`.
pub async fn module_institute(conn: &mut PgConnection, module_id: i64) -> AppResult<i64> {
    db::catalog::module_institute(conn, module_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Module not found".to_string()))
}

/// Role ids held by a user across every institute.
pub async fn own_role_ids(conn: &mut PgConnection, user_id: i64) -> AppResult<Vec<i64>> {
    let grants = db::roles_for_user(conn, user_id).await?;
    Ok(grants.iter().map(|grant| grant.role_id).collect())
}
