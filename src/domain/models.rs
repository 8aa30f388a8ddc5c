use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "role_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Admin,
    Instructor,
    Student,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "role_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    Active,
    Inactive,
    Pending,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "assessment_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssessmentType {
    Essay,
    Choices,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "enrollment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Passed,
    Pending,
    Accepted,
}

/// Question id -> option payload, in the order the instructor wrote them.
pub type QuestionMap = serde_json::Map<String, serde_json::Value>;

/// Question id -> correct option.
pub type AnswerKey = serde_json::Map<String, serde_json::Value>;

/// Question id -> option picked by the student.
pub type SubmittedAnswers = serde_json::Map<String, serde_json::Value>;

/// A role tuple as seen by authorization checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleGrant {
    pub role_id: i64,
    pub user_id: i64,
    pub institute_id: i64,
    pub kind: RoleKind,
    pub status: RoleStatus,
}

impl RoleGrant {
    pub fn is_active(&self, kind: RoleKind) -> bool {
        self.kind == kind && self.status == RoleStatus::Active
    }
}

/// True when `grants` hold an active role of one of `kinds` inside `institute_id`.
pub fn holds_active_role(grants: &[RoleGrant], institute_id: i64, kinds: &[RoleKind]) -> bool {
    grants.iter().any(|grant| {
        grant.institute_id == institute_id
            && grant.status == RoleStatus::Active
            && kinds.contains(&grant.kind)
    })
}

/// First active role of `kind` held inside `institute_id`.
pub fn active_role_in(grants: &[RoleGrant], institute_id: i64, kind: RoleKind) -> Option<RoleGrant> {
    grants
        .iter()
        .copied()
        .find(|grant| grant.institute_id == institute_id && grant.is_active(kind))
}
