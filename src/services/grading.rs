//! Instructor score overrides with an audit trail.

use crate::db::submissions::Submission;
use crate::db::{assessments, submissions};
use crate::domain::models::RoleKind;
use crate::error::{AppError, AppResult};
use crate::services::access;
use serde_json::json;
use sqlx::PgPool;

pub const SCORE_RANGE: std::ops::RangeInclusive<i32> = 0..=100;

fn check_score(score: i32) -> AppResult<()> {
    if SCORE_RANGE.contains(&score) {
        return Ok(());
    }
    Err(AppError::validation_with(
        "Validation error",
        json!({ "score": ["Score must be between 0 and 100"] }),
    ))
}

/// Overrides a submission's score and appends the change to the audit trail.
///
/// The grader must be an active instructor of the institute owning the
/// assessment. The submission row stays locked until the audit row is written.
pub async fn update_score(
    pool: &PgPool,
    grader_user_id: i64,
    submission_id: i64,
    new_score: i32,
) -> AppResult<Submission> {
    let mut tx = pool.begin().await?;

    let current = submissions::lock_submission(&mut *tx, submission_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Submission not found".to_string()))?;
    let assessment = assessments::find_scoped_assessment(&mut *tx, current.assessment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Assessment not found".to_string()))?;

    let grader = access::require_role(&mut *tx, grader_user_id, assessment.institute_id, RoleKind::Instructor)
        .await
        .inspect_err(|_| {
            tracing::warn!(
                submission_id,
                user_id = grader_user_id,
                "Grade change refused: not an instructor of this institute"
            );
        })?;

    check_score(new_score)?;

    let updated = submissions::update_score(&mut *tx, submission_id, new_score).await?;
    submissions::record_grade_change(&mut *tx, submission_id, grader.role_id, current.score, new_score).await?;
    tx.commit().await?;

    tracing::info!(
        submission_id,
        grader_role_id = grader.role_id,
        previous_score = ?current.score,
        new_score,
        "Grade changed"
    );
    Ok(updated)
}
