use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grading::GradeOutcome;
use crate::model::ids::{QuestionId, QuizId, StudentId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Malformed answer payloads. Unknown question ids are not an error; they are dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("answer to question {0} carries both an option and text")]
    Ambiguous(QuestionId),

    #[error("question {0} is answered more than once")]
    Duplicate(QuestionId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("attempt {0} is not in progress")]
    NotInProgress(u32),
}

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// One submitted answer. Choice questions use `selected_option`, free text uses `text_answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub selected_option: Option<usize>,
    pub text_answer: Option<String>,
}

impl Answer {
    #[must_use]
    pub fn choice(question_id: QuestionId, option: usize) -> Self {
        Self {
            question_id,
            selected_option: Some(option),
            text_answer: None,
        }
    }

    #[must_use]
    pub fn text(question_id: QuestionId, text: impl Into<String>) -> Self {
        Self {
            question_id,
            selected_option: None,
            text_answer: Some(text.into()),
        }
    }
}

/// Check the payload shape before any grading happens.
///
/// # Errors
///
/// Returns `AnswerError` for an answer holding both an option and text, or for a
/// question answered twice.
pub fn validate_answers(answers: &[Answer]) -> Result<(), AnswerError> {
    let mut seen = HashSet::with_capacity(answers.len());
    for answer in answers {
        let has_text = answer
            .text_answer
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if answer.selected_option.is_some() && has_text {
            return Err(AnswerError::Ambiguous(answer.question_id));
        }
        if !seen.insert(answer.question_id) {
            return Err(AnswerError::Duplicate(answer.question_id));
        }
    }
    Ok(())
}

/// Per-question line of a graded attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradedAnswer {
    pub question_id: QuestionId,
    pub selected_option: Option<usize>,
    pub text_answer: Option<String>,
    pub is_correct: bool,
    pub points_earned: u32,
}

//
// ─── ATTEMPT ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Graded,
    /// Superseded by a newer attempt before it was submitted.
    Abandoned,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Graded => "graded",
            AttemptStatus::Abandoned => "abandoned",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(AttemptStatus::InProgress),
            "graded" => Some(AttemptStatus::Graded),
            "abandoned" => Some(AttemptStatus::Abandoned),
            _ => None,
        }
    }
}

/// One pass through a quiz by one student.
///
/// Numbers are allocated by storage at start time. Once `submitted_at` is set the
/// attempt is never modified again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub student_id: StudentId,
    pub quiz_id: QuizId,
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub answers: Vec<GradedAnswer>,
    pub time_spent_secs: u32,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: u8,
    pub points_earned: u32,
    pub total_points: u32,
    pub passed: bool,
}

impl QuizAttempt {
    #[must_use]
    pub fn started(
        student_id: StudentId,
        quiz_id: QuizId,
        attempt_number: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id,
            quiz_id,
            attempt_number,
            status: AttemptStatus::InProgress,
            answers: Vec::new(),
            time_spent_secs: 0,
            started_at,
            submitted_at: None,
            score: 0,
            points_earned: 0,
            total_points: 0,
            passed: false,
        }
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }

    /// Apply a grade and freeze the attempt.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::NotInProgress` if the attempt was already graded or abandoned.
    pub fn apply_grade(
        &mut self,
        outcome: GradeOutcome,
        time_spent_secs: u32,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), AttemptError> {
        if self.status != AttemptStatus::InProgress || self.is_submitted() {
            return Err(AttemptError::NotInProgress(self.attempt_number));
        }
        self.status = AttemptStatus::Graded;
        self.answers = outcome.answers;
        self.time_spent_secs = time_spent_secs;
        self.submitted_at = Some(submitted_at);
        self.score = outcome.score;
        self.points_earned = outcome.points_earned;
        self.total_points = outcome.total_points;
        self.passed = outcome.passed;
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn validate_rejects_ambiguous_and_duplicate_answers() {
        let q = QuestionId::new(1);
        let both = Answer {
            question_id: q,
            selected_option: Some(0),
            text_answer: Some("also text".into()),
        };
        assert_eq!(validate_answers(&[both]), Err(AnswerError::Ambiguous(q)));

        let dup = [Answer::choice(q, 0), Answer::choice(q, 1)];
        assert_eq!(validate_answers(&dup), Err(AnswerError::Duplicate(q)));
    }

    #[test]
    fn blank_text_next_to_option_is_accepted() {
        let answer = Answer {
            question_id: QuestionId::new(1),
            selected_option: Some(2),
            text_answer: Some(String::new()),
        };
        assert!(validate_answers(&[answer]).is_ok());
    }

    #[test]
    fn grading_freezes_attempt() {
        let mut attempt =
            QuizAttempt::started(StudentId::random(), QuizId::new(1), 1, fixed_now());
        let outcome = GradeOutcome {
            answers: Vec::new(),
            points_earned: 5,
            total_points: 10,
            score: 50,
            passed: false,
        };
        attempt.apply_grade(outcome.clone(), 30, fixed_now()).unwrap();
        assert_eq!(attempt.status, AttemptStatus::Graded);
        assert_eq!(attempt.score, 50);
        assert!(attempt.is_submitted());

        let err = attempt.apply_grade(outcome, 10, fixed_now()).unwrap_err();
        assert_eq!(err, AttemptError::NotInProgress(1));
        assert_eq!(attempt.time_spent_secs, 30);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            AttemptStatus::InProgress,
            AttemptStatus::Graded,
            AttemptStatus::Abandoned,
        ] {
            assert_eq!(AttemptStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AttemptStatus::parse("paused"), None);
    }
}
