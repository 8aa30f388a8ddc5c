//! Auto-grading of submitted answers.
//!
//! Essay assessments are never scored here; choice assessments are scored as
//! the rounded percentage of questions whose submitted option equals the key.

use crate::domain::models::{AnswerKey, AssessmentType, QuestionMap, SubmittedAnswers};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoringError {
    #[error("assessment detail missing for a choices assessment")]
    DetailMissing,
    #[error("answer key missing for a choices assessment")]
    AnswerKeyMissing,
    #[error("answer key has no entry for question {0}")]
    AnswerKeyIncomplete(String),
    #[error("assessment detail has no questions")]
    InvalidAssessmentDetail,
}

/// What the scoring engine needs to know about an assessment.
#[derive(Debug, Clone, Copy)]
pub enum Grading<'a> {
    Essay,
    Choices {
        question_map: &'a QuestionMap,
        answer_key: &'a AnswerKey,
    },
}

impl<'a> Grading<'a> {
    /// Pairs an assessment type with its (optional) detail payload.
    pub fn resolve(
        kind: AssessmentType,
        detail: Option<(&'a QuestionMap, Option<&'a AnswerKey>)>,
    ) -> Result<Self, ScoringError> {
        match kind {
            AssessmentType::Essay => Ok(Grading::Essay),
            AssessmentType::Choices => {
                let (question_map, answer_key) = detail.ok_or(ScoringError::DetailMissing)?;
                let answer_key = answer_key.ok_or(ScoringError::AnswerKeyMissing)?;
                Ok(Grading::Choices {
                    question_map,
                    answer_key,
                })
            }
        }
    }
}

/// Returns `None` for essays and a percentage in `0..=100` for choices.
pub fn score(grading: Grading<'_>, submitted: &SubmittedAnswers) -> Result<Option<i32>, ScoringError> {
    match grading {
        Grading::Essay => Ok(None),
        Grading::Choices {
            question_map,
            answer_key,
        } => score_choices(question_map, answer_key, submitted).map(Some),
    }
}

fn score_choices(
    question_map: &QuestionMap,
    answer_key: &AnswerKey,
    submitted: &SubmittedAnswers,
) -> Result<i32, ScoringError> {
    let total = question_map.len();
    if total == 0 {
        return Err(ScoringError::InvalidAssessmentDetail);
    }

    let mut correct = 0usize;
    for question_id in question_map.keys() {
        let expected = answer_key
            .get(question_id)
            .ok_or_else(|| ScoringError::AnswerKeyIncomplete(question_id.clone()))?;
        if submitted.get(question_id) == Some(expected) {
            correct += 1;
        }
    }

    Ok(percentage(correct, total))
}

fn percentage(correct: usize, total: usize) -> i32 {
    let ratio = correct as f64 / total as f64 * 100.0;
    (ratio.round() as i32).clamp(0, 100)
}

/// Question ids present in `question_map` but missing from `answer_key`.
pub fn uncovered_questions(question_map: &QuestionMap, answer_key: &AnswerKey) -> Vec<String> {
    question_map
        .keys()
        .filter(|question_id| !answer_key.contains_key(*question_id))
        .cloned()
        .collect()
}
