//! Courses, modules and enrollments.

use crate::domain::models::EnrollmentStatus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Course {
    pub id: i64,
    pub institute_id: i64,
    pub role_id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub media: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Module {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub content: String,
    pub module_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Enrollment {
    pub id: i64,
    pub role_id: i64,
    pub course_id: i64,
    pub enrolled_at: DateTime<Utc>,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COURSE_COLUMNS: &str =
    "id, institute_id, role_id, title, description, category, media, created_at, updated_at";
const MODULE_COLUMNS: &str = "id, course_id, title, content, module_file, created_at, updated_at";
const ENROLLMENT_COLUMNS: &str = "id, role_id, course_id, enrolled_at, status, created_at, updated_at";

pub struct NewCourse<'a> {
    pub institute_id: i64,
    pub role_id: i64,
    pub title: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub media: Option<&'a str>,
}

pub async fn insert_course(conn: &mut PgConnection, course: &NewCourse<'_>) -> Result<Course> {
    let row = sqlx::query_as::<_, Course>(&format!(
        r#"
        INSERT INTO courses (institute_id, role_id, title, description, category, media)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {COURSE_COLUMNS}
        "#
    ))
    .bind(course.institute_id)
    .bind(course.role_id)
    .bind(course.title)
    .bind(course.description)
    .bind(course.category)
    .bind(course.media)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn find_course(conn: &mut PgConnection, id: i64) -> Result<Option<Course>> {
    let row = sqlx::query_as::<_, Course>(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn insert_module(
    conn: &mut PgConnection,
    course_id: i64,
    title: &str,
    content: &str,
    module_file: Option<&str>,
) -> Result<Module> {
    let row = sqlx::query_as::<_, Module>(&format!(
        r#"
        INSERT INTO modules (course_id, title, content, module_file)
        VALUES ($1, $2, $3, $4)
        RETURNING {MODULE_COLUMNS}
        "#
    ))
    .bind(course_id)
    .bind(title)
    .bind(content)
    .bind(module_file)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn find_module(conn: &mut PgConnection, id: i64) -> Result<Option<Module>> {
    let row = sqlx::query_as::<_, Module>(&format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn list_course_modules(conn: &mut PgConnection, course_id: i64) -> Result<Vec<Module>> {
    let rows = sqlx::query_as::<_, Module>(&format!(
        "SELECT {MODULE_COLUMNS} FROM modules WHERE course_id = $1 ORDER BY id"
    ))
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Modules of courses in every institute where the user holds an active role.
pub async fn list_visible_modules(conn: &mut PgConnection, user_id: i64) -> Result<Vec<Module>> {
    let rows = sqlx::query_as::<_, Module>(&format!(
        r#"
        SELECT {MODULE_COLUMNS} FROM modules
        WHERE course_id IN (
            SELECT c.id
            FROM courses c
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

/// Institute that owns a module, through its course.
pub async fn module_institute(conn: &mut PgConnection, module_id: i64) -> Result<Option<i64>> {
    let institute_id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT c.institute_id
        FROM modules m
        JOIN courses c ON c.id = m.course_id
        WHERE m.id = $1
        "#,
    )
    .bind(module_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(institute_id)
}

#[derive(Debug, Default)]
pub struct ModuleChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub module_file: Option<String>,
}

pub async fn update_module(conn: &mut PgConnection, id: i64, changes: &ModuleChanges) -> Result<Module> {
    let row = sqlx::query_as::<_, Module>(&format!(
        r#"
        UPDATE modules
        SET title = COALESCE($2, title),
            content = COALESCE($3, content),
            module_file = COALESCE($4, module_file),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {MODULE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(changes.title.as_deref())
    .bind(changes.content.as_deref())
    .bind(changes.module_file.as_deref())
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn delete_module(conn: &mut PgConnection, id: i64) -> std::result::Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM modules WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_enrollment(
    conn: &mut PgConnection,
    role_id: i64,
    course_id: i64,
) -> std::result::Result<Enrollment, sqlx::Error> {
    sqlx::query_as::<_, Enrollment>(&format!(
        r#"
        INSERT INTO enrollments (role_id, course_id, status)
        VALUES ($1, $2, 'pending')
        RETURNING {ENROLLMENT_COLUMNS}
        "#
    ))
    .bind(role_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await
}

pub async fn find_enrollment(conn: &mut PgConnection, id: i64) -> Result<Option<Enrollment>> {
    let row = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Enrollments visible to a user: their own roles' enrollments plus every
/// enrollment of institutes where they are an active admin or instructor.
pub async fn list_visible_enrollments(conn: &mut PgConnection, user_id: i64) -> Result<Vec<Enrollment>> {
    let rows = sqlx::query_as::<_, Enrollment>(
        r#"
        SELECT e.id, e.role_id, e.course_id, e.enrolled_at, e.status, e.created_at, e.updated_at
        FROM enrollments e
        JOIN roles r ON r.id = e.role_id
        JOIN courses c ON c.id = e.course_id
        WHERE r.user_id = $1
           OR c.institute_id IN (
                SELECT institute_id FROM roles
                WHERE user_id = $1
                  AND status = 'active'
                  AND role IN ('admin', 'instructor')
           )
        ORDER BY e.id
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn update_enrollment_status(
    conn: &mut PgConnection,
    id: i64,
    status: EnrollmentStatus,
) -> Result<Enrollment> {
    let row = sqlx::query_as::<_, Enrollment>(&format!(
        r#"
        UPDATE enrollments SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {ENROLLMENT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

/// True when one of `role_ids` is enrolled in the course.
pub async fn is_enrolled(conn: &mut PgConnection, role_ids: &[i64], course_id: i64) -> Result<bool> {
    let enrolled: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM enrollments WHERE role_id = ANY($1) AND course_id = $2)",
    )
    .bind(role_ids)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(enrolled)
}
