use crate::db::assessments::json_text;
use crate::domain::models::SubmittedAnswers;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Submission {
    pub id: i64,
    pub assessment_id: i64,
    pub role_id: i64,
    pub score: Option<i32>,
    pub answer: Option<Json<SubmittedAnswers>>,
    pub file: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A submission with the submitter's display name, for instructor listings.
#[derive(Debug, Serialize, FromRow)]
pub struct NamedSubmission {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub submission: Submission,
    pub submitter_name: String,
}

#[derive(Debug, Serialize, FromRow)]
pub struct GradeChange {
    pub id: i64,
    pub submission_id: i64,
    pub grader_role_id: i64,
    pub previous_score: Option<i32>,
    pub new_score: i32,
    pub changed_at: DateTime<Utc>,
}

const SUBMISSION_COLUMNS: &str = "id, assessment_id, role_id, score, answer, file, submitted_at, updated_at";

pub struct NewSubmission<'a> {
    pub assessment_id: i64,
    pub role_id: i64,
    pub answer: Option<&'a SubmittedAnswers>,
    pub file: Option<&'a str>,
    pub score: Option<i32>,
}

/// Inserts a submission. A second row for the same (assessment, role) pair
/// fails with a unique violation on `submissions_assessment_role_key`.
pub async fn insert_submission(
    conn: &mut PgConnection,
    new: &NewSubmission<'_>,
) -> std::result::Result<Submission, sqlx::Error> {
    let answer = new.answer.map(json_text).transpose()?;

    sqlx::query_as::<_, Submission>(&format!(
        r#"
        INSERT INTO submissions (assessment_id, role_id, score, answer, file)
        VALUES ($1, $2, $3, $4::json, $5)
        RETURNING {SUBMISSION_COLUMNS}
        "#
    ))
    .bind(new.assessment_id)
    .bind(new.role_id)
    .bind(new.score)
    .bind(answer)
    .bind(new.file)
    .fetch_one(&mut *conn)
    .await
}

pub async fn submission_exists(conn: &mut PgConnection, assessment_id: i64, role_id: i64) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM submissions WHERE assessment_id = $1 AND role_id = $2)",
    )
    .bind(assessment_id)
    .bind(role_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

pub async fn find_submission(conn: &mut PgConnection, id: i64) -> Result<Option<Submission>> {
    let row = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Row-locks a submission for a grade change.
pub async fn lock_submission(conn: &mut PgConnection, id: i64) -> Result<Option<Submission>> {
    let row = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn list_by_assessment(conn: &mut PgConnection, assessment_id: i64) -> Result<Vec<NamedSubmission>> {
    let rows = sqlx::query_as::<_, NamedSubmission>(
        r#"
        SELECT s.id, s.assessment_id, s.role_id, s.score, s.answer, s.file,
               s.submitted_at, s.updated_at, u.name AS submitter_name
        FROM submissions s
        JOIN roles r ON r.id = s.role_id
        JOIN users u ON u.id = r.user_id
        WHERE s.assessment_id = $1
        ORDER BY s.submitted_at, s.id
        "#,
    )
    .bind(assessment_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn list_for_roles(conn: &mut PgConnection, role_ids: &[i64]) -> Result<Vec<Submission>> {
    let rows = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE role_id = ANY($1) ORDER BY submitted_at, id"
    ))
    .bind(role_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn find_for_roles_and_assessment(
    conn: &mut PgConnection,
    role_ids: &[i64],
    assessment_id: i64,
) -> Result<Option<Submission>> {
    let row = sqlx::query_as::<_, Submission>(&format!(
        r#"
        SELECT {SUBMISSION_COLUMNS} FROM submissions
        WHERE role_id = ANY($1) AND assessment_id = $2
        ORDER BY id
        LIMIT 1
        "#
    ))
    .bind(role_ids)
    .bind(assessment_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn update_score(conn: &mut PgConnection, id: i64, score: i32) -> Result<Submission> {
    let row = sqlx::query_as::<_, Submission>(&format!(
        r#"
        UPDATE submissions SET score = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {SUBMISSION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(score)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn record_grade_change(
    conn: &mut PgConnection,
    submission_id: i64,
    grader_role_id: i64,
    previous_score: Option<i32>,
    new_score: i32,
) -> Result<GradeChange> {
    let row = sqlx::query_as::<_, GradeChange>(
        r#"
        INSERT INTO grade_changes (submission_id, grader_role_id, previous_score, new_score)
        VALUES ($1, $2, $3, $4)
        RETURNING id, submission_id, grader_role_id, previous_score, new_score, changed_at
        "#,
    )
    .bind(submission_id)
    .bind(grader_role_id)
    .bind(previous_score)
    .bind(new_score)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn list_grade_changes(conn: &mut PgConnection, submission_id: i64) -> Result<Vec<GradeChange>> {
    let rows = sqlx::query_as::<_, GradeChange>(
        r#"
        SELECT id, submission_id, grader_role_id, previous_score, new_score, changed_at
        FROM grade_changes
        WHERE submission_id = $1
        ORDER BY changed_at, id
        "#,
    )
    .bind(submission_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
