//! Accepting a learner submission: eligibility, scoring, attachment upload
//! and the ledger insert, in that order.

use crate::db::{self, assessments, submissions};
use crate::db::submissions::{NewSubmission, Submission};
use crate::domain::eligibility::{evaluate, AssessmentScope, Eligibility, EligibilityFacts};
use crate::domain::models::{AssessmentType, SubmittedAnswers};
use crate::domain::scoring::{self, Grading};
use crate::error::{conflict_on_unique, AppError, AppResult};
use crate::services::attachments::{self, Attachment};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use serde_json::json;

#[derive(Debug)]
pub struct SubmissionRequest {
    pub assessment_id: i64,
    pub role_id: i64,
    pub answer: Option<SubmittedAnswers>,
    pub attachment: Option<Attachment>,
}

pub async fn submit(
    state: &AppState,
    caller_user_id: i64,
    request: SubmissionRequest,
    now: DateTime<Utc>,
) -> AppResult<Submission> {
    let mut tx = state.pool.begin().await?;

    let assessment = assessments::find_scoped_assessment(&mut *tx, request.assessment_id).await?;
    let detail = match &assessment {
        Some(found) => assessments::find_detail(&mut *tx, found.id).await?,
        None => None,
    };
    let role = db::find_role(&mut *tx, request.role_id).await?.map(|role| role.grant());
    let already_submitted =
        submissions::submission_exists(&mut *tx, request.assessment_id, request.role_id).await?;

    let facts = EligibilityFacts {
        caller_user_id,
        assessment: assessment.as_ref().map(|found| AssessmentScope {
            assessment_id: found.id,
            institute_id: found.institute_id,
            deadline: detail.as_ref().map(|d| d.deadline),
        }),
        role,
        already_submitted,
    };
    if let Eligibility::Deny(denial) = evaluate(&facts, now) {
        tracing::info!(
            assessment_id = request.assessment_id,
            role_id = request.role_id,
            user_id = caller_user_id,
            reason = ?denial,
            "Submission refused"
        );
        return Err(denial.into());
    }
    let Some(assessment) = assessment else {
        return Err(AppError::NotFound("Assessment not found".to_string()));
    };

    match assessment.kind {
        AssessmentType::Essay if request.attachment.is_none() => {
            return Err(AppError::validation_with(
                "Validation error",
                json!({ "file": ["A file is required for essay assessments"] }),
            ));
        }
        AssessmentType::Choices if request.answer.is_none() => {
            return Err(AppError::validation_with(
                "Validation error",
                json!({ "answer": ["Answers are required for choices assessments"] }),
            ));
        }
        _ => {}
    }

    let grading = Grading::resolve(
        assessment.kind,
        detail.as_ref().map(|d| (&d.question.0, d.answer_key())),
    )?;
    let no_answers = SubmittedAnswers::new();
    let score = scoring::score(grading, request.answer.as_ref().unwrap_or(&no_answers))?;

    // The unique constraint still guards the insert, so a racing duplicate
    // can leave an uploaded file with no submission pointing at it.
    let file = match request.attachment {
        Some(attachment) => {
            Some(attachments::upload(state.file_store.as_ref(), attachment, state.upload_timeout).await?)
        }
        None => None,
    };

    let submission = submissions::insert_submission(
        &mut *tx,
        &NewSubmission {
            assessment_id: assessment.id,
            role_id: request.role_id,
            answer: request.answer.as_ref(),
            file: file.as_deref(),
            score,
        },
    )
    .await
    .map_err(|e| conflict_on_unique(e, "already submitted"))?;

    tx.commit().await?;

    tracing::info!(
        submission_id = submission.id,
        assessment_id = submission.assessment_id,
        role_id = submission.role_id,
        score = ?submission.score,
        "Submission accepted"
    );
    Ok(submission)
}
