use crate::domain::models::{AnswerKey, AssessmentType, QuestionMap};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Assessment {
    pub id: i64,
    pub module_id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: AssessmentType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AssessmentDetail {
    pub id: i64,
    pub assessment_id: i64,
    pub title: String,
    pub question: Json<QuestionMap>,
    pub answer: Option<Json<AnswerKey>>,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire shape of a detail; `answer` is omitted for learners.
#[derive(Debug, Serialize)]
pub struct DetailView {
    pub id: i64,
    pub assessment_id: i64,
    pub title: String,
    pub question: QuestionMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<AnswerKey>,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssessmentDetail {
    pub fn answer_key(&self) -> Option<&AnswerKey> {
        self.answer.as_ref().map(|key| &key.0)
    }

    pub fn into_view(self, include_answer: bool) -> DetailView {
        DetailView {
            id: self.id,
            assessment_id: self.assessment_id,
            title: self.title,
            question: self.question.0,
            answer: if include_answer { self.answer.map(|key| key.0) } else { None },
            deadline: self.deadline,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// An assessment together with the institute that owns it.
#[derive(Debug, Clone, FromRow)]
pub struct ScopedAssessment {
    pub id: i64,
    pub module_id: i64,
    #[sqlx(rename = "type")]
    pub kind: AssessmentType,
    pub institute_id: i64,
}

const ASSESSMENT_COLUMNS: &str = "id, module_id, type, created_at, updated_at";
const DETAIL_COLUMNS: &str =
    "id, assessment_id, title, question, answer, deadline, created_at, updated_at";

pub async fn insert_assessment(conn: &mut PgConnection, module_id: i64, kind: AssessmentType) -> Result<Assessment> {
    let row = sqlx::query_as::<_, Assessment>(&format!(
        "INSERT INTO assessments (module_id, type) VALUES ($1, $2) RETURNING {ASSESSMENT_COLUMNS}"
    ))
    .bind(module_id)
    .bind(kind)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn find_assessment(conn: &mut PgConnection, id: i64) -> Result<Option<Assessment>> {
    let row = sqlx::query_as::<_, Assessment>(&format!(
        "SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Looks up an assessment and resolves module -> course -> institute.
pub async fn find_scoped_assessment(conn: &mut PgConnection, id: i64) -> Result<Option<ScopedAssessment>> {
    let row = sqlx::query_as::<_, ScopedAssessment>(
        r#"
        SELECT a.id, a.module_id, a.type, c.institute_id
        FROM assessments a
        JOIN modules m ON m.id = a.module_id
        JOIN courses c ON c.id = m.course_id
        WHERE a.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn list_module_assessments(conn: &mut PgConnection, module_id: i64) -> Result<Vec<Assessment>> {
    let rows = sqlx::query_as::<_, Assessment>(&format!(
        "SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE module_id = $1 ORDER BY id"
    ))
    .bind(module_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Assessments in every institute where the user holds an active role.
pub async fn list_visible_assessments(conn: &mut PgConnection, user_id: i64) -> Result<Vec<Assessment>> {
    let rows = sqlx::query_as::<_, Assessment>(&format!(
        r#"
        SELECT {ASSESSMENT_COLUMNS} FROM assessments
        WHERE module_id IN (
            SELECT m.id
            FROM modules m
            JOIN courses c ON c.id = m.course_id
            JOIN roles r ON r.institute_id = c.institute_id
            WHERE r.user_id = $1 AND r.status = 'active'
        )
        ORDER BY id
        "#
    ))
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

#[derive(Debug, Default)]
pub struct AssessmentChanges {
    pub module_id: Option<i64>,
    pub kind: Option<AssessmentType>,
}

pub async fn update_assessment(
    conn: &mut PgConnection,
    id: i64,
    changes: &AssessmentChanges,
) -> Result<Assessment> {
    let row = sqlx::query_as::<_, Assessment>(&format!(
        r#"
        UPDATE assessments
        SET module_id = COALESCE($2, module_id),
            type = COALESCE($3, type),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {ASSESSMENT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(changes.module_id)
    .bind(changes.kind)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn delete_assessment(conn: &mut PgConnection, id: i64) -> std::result::Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM assessments WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub struct NewDetail<'a> {
    pub assessment_id: i64,
    pub title: &'a str,
    pub question: &'a QuestionMap,
    pub answer: Option<&'a AnswerKey>,
    pub deadline: DateTime<Utc>,
}

/// JSON text for `json` columns; binding `Json<T>` would go through jsonb and
/// lose the key order.
pub(crate) fn json_text<T: Serialize>(value: &T) -> std::result::Result<String, sqlx::Error> {
    serde_json::to_string(value).map_err(|e| sqlx::Error::Protocol(format!("json encode failed: {e}")))
}

pub async fn insert_detail(
    conn: &mut PgConnection,
    detail: &NewDetail<'_>,
) -> std::result::Result<AssessmentDetail, sqlx::Error> {
    let question = json_text(detail.question)?;
    let answer = detail.answer.map(json_text).transpose()?;

    sqlx::query_as::<_, AssessmentDetail>(&format!(
        r#"
        INSERT INTO assessment_details (assessment_id, title, question, answer, deadline)
        VALUES ($1, $2, $3::json, $4::json, $5)
        RETURNING {DETAIL_COLUMNS}
        "#
    ))
    .bind(detail.assessment_id)
    .bind(detail.title)
    .bind(question)
    .bind(answer)
    .bind(detail.deadline)
    .fetch_one(&mut *conn)
    .await
}

pub async fn find_detail(conn: &mut PgConnection, assessment_id: i64) -> Result<Option<AssessmentDetail>> {
    let row = sqlx::query_as::<_, AssessmentDetail>(&format!(
        "SELECT {DETAIL_COLUMNS} FROM assessment_details WHERE assessment_id = $1"
    ))
    .bind(assessment_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Drops a stored answer key; returns whether a detail row was touched.
pub async fn clear_detail_answer(conn: &mut PgConnection, assessment_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE assessment_details SET answer = NULL, updated_at = NOW() WHERE assessment_id = $1 AND answer IS NOT NULL",
    )
    .bind(assessment_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Writes back every mutable field of a detail.
pub async fn save_detail(conn: &mut PgConnection, detail: &AssessmentDetail) -> Result<AssessmentDetail> {
    let question = json_text(&detail.question.0)?;
    let answer = detail.answer_key().map(json_text).transpose()?;

    let row = sqlx::query_as::<_, AssessmentDetail>(&format!(
        r#"
        UPDATE assessment_details
        SET title = $2,
            question = $3::json,
            answer = $4::json,
            deadline = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {DETAIL_COLUMNS}
        "#
    ))
    .bind(detail.id)
    .bind(&detail.title)
    .bind(question)
    .bind(answer)
    .bind(detail.deadline)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_text_keeps_question_order() {
        let question: QuestionMap = serde_json::from_value(json!({ "3": ["A"], "1": ["B"], "2": ["C"] })).unwrap();
        assert_eq!(json_text(&question).unwrap(), r#"{"3":["A"],"1":["B"],"2":["C"]}"#);
    }
}
