//! Decides whether a student role may submit to an assessment.
//!
//! Checks run in a fixed order and the first failure is the reported reason:
//! assessment exists, caller role is an active student of the owning
//! institute, no prior submission, deadline not passed.

use crate::domain::models::{RoleGrant, RoleKind, RoleStatus};
use chrono::{DateTime, Utc};

/// Everything the evaluator reads, loaded up front by the caller.
#[derive(Debug, Clone)]
pub struct EligibilityFacts {
    pub caller_user_id: i64,
    /// `None` when the assessment does not exist.
    pub assessment: Option<AssessmentScope>,
    /// `None` when the role id does not exist.
    pub role: Option<RoleGrant>,
    pub already_submitted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AssessmentScope {
    pub assessment_id: i64,
    pub institute_id: i64,
    /// `None` when no detail record exists: no deadline applies.
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NotFound,
    Unauthorized,
    AlreadySubmitted,
    DeadlinePassed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Allow,
    Deny(Denial),
}

pub fn evaluate(facts: &EligibilityFacts, now: DateTime<Utc>) -> Eligibility {
    let Some(assessment) = facts.assessment else {
        return Eligibility::Deny(Denial::NotFound);
    };

    let role_ok = facts.role.is_some_and(|role| {
        role.user_id == facts.caller_user_id
            && role.institute_id == assessment.institute_id
            && role.kind == RoleKind::Student
            && role.status == RoleStatus::Active
    });
    if !role_ok {
        return Eligibility::Deny(Denial::Unauthorized);
    }

    if facts.already_submitted {
        return Eligibility::Deny(Denial::AlreadySubmitted);
    }

    if let Some(deadline) = assessment.deadline {
        if deadline < now {
            return Eligibility::Deny(Denial::DeadlinePassed);
        }
    }

    Eligibility::Allow
}
