use std::collections::HashSet;
use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CourseId, QuestionId, QuizId, SubchapterId};

/// Passing threshold used when an author does not pick one.
pub const DEFAULT_PASSING_SCORE: u8 = 70;

/// Attempt ceiling used when an author does not pick one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Authoring-time validation failures. A quiz that fails these is never graded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz title cannot be empty")]
    EmptyTitle,

    #[error("quiz must contain at least one question")]
    NoQuestions,

    #[error("question text cannot be empty")]
    EmptyQuestion(QuestionId),

    #[error("question {0} appears more than once")]
    DuplicateQuestion(QuestionId),

    #[error("question {question} must have exactly one correct option, found {found}")]
    CorrectOptionCount { question: QuestionId, found: usize },

    #[error("true/false question {0} must have exactly two options")]
    TrueFalseShape(QuestionId),

    #[error("short-answer question {0} cannot carry options")]
    ShortAnswerOptions(QuestionId),

    #[error("passing score must be within 0..=100, got {0}")]
    InvalidPassingScore(u8),
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
}

impl QuestionType {
    /// Whether answers are an index into the option list.
    #[must_use]
    pub fn is_choice(self) -> bool {
        matches!(self, QuestionType::MultipleChoice | QuestionType::TrueFalse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    pub is_correct: bool,
}

impl QuestionOption {
    #[must_use]
    pub fn new(text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            text: text.into(),
            is_correct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    text: String,
    kind: QuestionType,
    #[serde(default)]
    options: Vec<QuestionOption>,
    points: u32,
    explanation: Option<String>,
    /// Reference answer shown on reveal; grading of free text stays with the grader.
    model_answer: Option<String>,
}

impl Question {
    /// # Errors
    ///
    /// Returns `QuizError` if the text is blank or the options do not contain
    /// exactly one correct entry.
    pub fn multiple_choice(
        id: QuestionId,
        text: impl Into<String>,
        options: Vec<QuestionOption>,
        points: u32,
    ) -> Result<Self, QuizError> {
        let question = Self {
            id,
            text: text.into(),
            kind: QuestionType::MultipleChoice,
            options,
            points,
            explanation: None,
            model_answer: None,
        };
        question.validate()?;
        Ok(question)
    }

    /// Builds a two-option question whose options are `True` and `False`.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::EmptyQuestion` if the text is blank.
    pub fn true_false(
        id: QuestionId,
        text: impl Into<String>,
        answer: bool,
        points: u32,
    ) -> Result<Self, QuizError> {
        let question = Self {
            id,
            text: text.into(),
            kind: QuestionType::TrueFalse,
            options: vec![
                QuestionOption::new("True", answer),
                QuestionOption::new("False", !answer),
            ],
            points,
            explanation: None,
            model_answer: None,
        };
        question.validate()?;
        Ok(question)
    }

    /// # Errors
    ///
    /// Returns `QuizError::EmptyQuestion` if the text is blank.
    pub fn short_answer(
        id: QuestionId,
        text: impl Into<String>,
        points: u32,
    ) -> Result<Self, QuizError> {
        let question = Self {
            id,
            text: text.into(),
            kind: QuestionType::ShortAnswer,
            options: Vec::new(),
            points,
            explanation: None,
            model_answer: None,
        };
        question.validate()?;
        Ok(question)
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    #[must_use]
    pub fn with_model_answer(mut self, answer: impl Into<String>) -> Self {
        self.model_answer = Some(answer.into());
        self
    }

    /// # Errors
    ///
    /// Returns the first authoring rule this question breaks.
    pub fn validate(&self) -> Result<(), QuizError> {
        if self.text.trim().is_empty() {
            return Err(QuizError::EmptyQuestion(self.id));
        }
        match self.kind {
            QuestionType::ShortAnswer if !self.options.is_empty() => {
                return Err(QuizError::ShortAnswerOptions(self.id));
            }
            QuestionType::TrueFalse if self.options.len() != 2 => {
                return Err(QuizError::TrueFalseShape(self.id));
            }
            _ => {}
        }
        if self.kind.is_choice() {
            let found = self.options.iter().filter(|o| o.is_correct).count();
            if found != 1 {
                return Err(QuizError::CorrectOptionCount {
                    question: self.id,
                    found,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn kind(&self) -> QuestionType {
        self.kind
    }

    #[must_use]
    pub fn options(&self) -> &[QuestionOption] {
        &self.options
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.points
    }

    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    #[must_use]
    pub fn model_answer(&self) -> Option<&str> {
        self.model_answer.as_deref()
    }

    /// Index of the single correct option; `None` for short-answer questions.
    #[must_use]
    pub fn correct_option(&self) -> Option<usize> {
        self.options.iter().position(|o| o.is_correct)
    }
}

//
// ─── QUIZ SETTINGS ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxAttempts {
    Limited(NonZeroU32),
    Unlimited,
}

impl MaxAttempts {
    /// Returns `None` for zero, which is not a valid ceiling.
    #[must_use]
    pub fn limited(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self::Limited)
    }

    /// Whether a new attempt may start given the number already on record.
    #[must_use]
    pub fn allows(self, existing: u32) -> bool {
        match self {
            MaxAttempts::Limited(max) => existing < max.get(),
            MaxAttempts::Unlimited => true,
        }
    }

    /// Attempts left after `used`; `None` when unbounded.
    #[must_use]
    pub fn remaining(self, used: u32) -> Option<u32> {
        match self {
            MaxAttempts::Limited(max) => Some(max.get().saturating_sub(used)),
            MaxAttempts::Unlimited => None,
        }
    }

    #[must_use]
    pub fn as_limit(self) -> Option<u32> {
        match self {
            MaxAttempts::Limited(max) => Some(max.get()),
            MaxAttempts::Unlimited => None,
        }
    }
}

impl Default for MaxAttempts {
    fn default() -> Self {
        Self::Limited(NonZeroU32::new(DEFAULT_MAX_ATTEMPTS).unwrap_or(NonZeroU32::MIN))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Where the quiz lives: the standalone quiz entity or the legacy per-subchapter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizPlacement {
    #[default]
    Standalone,
    Subchapter(SubchapterId),
}

//
// ─── QUIZ ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    id: QuizId,
    course_id: CourseId,
    #[serde(default)]
    placement: QuizPlacement,
    title: String,
    description: Option<String>,
    #[serde(default)]
    difficulty: Difficulty,
    questions: Vec<Question>,
    passing_score: u8,
    #[serde(default)]
    max_attempts: MaxAttempts,
    published_at: Option<DateTime<Utc>>,
}

impl Quiz {
    /// Create an unpublished standalone quiz with default passing score and attempt ceiling.
    ///
    /// # Errors
    ///
    /// Returns `QuizError` if the quiz or any question breaks an authoring rule.
    pub fn new(
        id: QuizId,
        course_id: CourseId,
        title: impl Into<String>,
        questions: Vec<Question>,
    ) -> Result<Self, QuizError> {
        let quiz = Self {
            id,
            course_id,
            placement: QuizPlacement::Standalone,
            title: title.into().trim().to_owned(),
            description: None,
            difficulty: Difficulty::default(),
            questions,
            passing_score: DEFAULT_PASSING_SCORE,
            max_attempts: MaxAttempts::default(),
            published_at: None,
        };
        quiz.validate()?;
        Ok(quiz)
    }

    /// # Errors
    ///
    /// Returns `QuizError::InvalidPassingScore` if `score > 100`.
    pub fn with_passing_score(mut self, score: u8) -> Result<Self, QuizError> {
        if score > 100 {
            return Err(QuizError::InvalidPassingScore(score));
        }
        self.passing_score = score;
        Ok(self)
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: MaxAttempts) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub(crate) fn placed(mut self, placement: QuizPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn publish(&mut self, at: DateTime<Utc>) {
        if self.published_at.is_none() {
            self.published_at = Some(at);
        }
    }

    pub fn unpublish(&mut self) {
        self.published_at = None;
    }

    /// # Errors
    ///
    /// Returns the first authoring rule the quiz breaks.
    pub fn validate(&self) -> Result<(), QuizError> {
        if self.title.is_empty() {
            return Err(QuizError::EmptyTitle);
        }
        if self.questions.is_empty() {
            return Err(QuizError::NoQuestions);
        }
        if self.passing_score > 100 {
            return Err(QuizError::InvalidPassingScore(self.passing_score));
        }
        let mut seen = HashSet::new();
        for question in &self.questions {
            if !seen.insert(question.id()) {
                return Err(QuizError::DuplicateQuestion(question.id()));
            }
            question.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> QuizId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn placement(&self) -> QuizPlacement {
        self.placement
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id() == id)
    }

    #[must_use]
    pub fn passing_score(&self) -> u8 {
        self.passing_score
    }

    #[must_use]
    pub fn max_attempts(&self) -> MaxAttempts {
        self.max_attempts
    }

    #[must_use]
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    /// Embedded quizzes are visible whenever their subchapter is; standalone
    /// quizzes need an explicit publish.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published_at.is_some() || matches!(self.placement, QuizPlacement::Subchapter(_))
    }

    #[must_use]
    pub fn total_points(&self) -> u32 {
        self.questions
            .iter()
            .map(Question::points)
            .fold(0, u32::saturating_add)
    }

    /// Student-facing copy with correct flags and explanations stripped.
    #[must_use]
    pub fn student_view(&self) -> QuizView {
        QuizView {
            id: self.id,
            course_id: self.course_id,
            title: self.title.clone(),
            description: self.description.clone(),
            difficulty: self.difficulty,
            passing_score: self.passing_score,
            max_attempts: self.max_attempts,
            questions: self
                .questions
                .iter()
                .map(|q| QuestionView {
                    id: q.id(),
                    text: q.text().to_owned(),
                    kind: q.kind(),
                    options: q.options().iter().map(|o| o.text.clone()).collect(),
                    points: q.points(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub text: String,
    pub kind: QuestionType,
    pub options: Vec<String>,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizView {
    pub id: QuizId,
    pub course_id: CourseId,
    pub title: String,
    pub description: Option<String>,
    pub difficulty: Difficulty,
    pub passing_score: u8,
    pub max_attempts: MaxAttempts,
    pub questions: Vec<QuestionView>,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn mc(id: u64, correct: usize) -> Question {
        let options = (0..3)
            .map(|i| QuestionOption::new(format!("Option {i}"), i == correct))
            .collect();
        Question::multiple_choice(QuestionId::new(id), format!("Q{id}"), options, 5).unwrap()
    }

    #[test]
    fn total_points_saturates() {
        let heavy = |id: u64| {
            let options = vec![QuestionOption::new("a", true), QuestionOption::new("b", false)];
            Question::multiple_choice(QuestionId::new(id), "Q", options, u32::MAX).unwrap()
        };
        let quiz = Quiz::new(QuizId::new(1), CourseId::new(1), "Heavy", vec![heavy(1), heavy(2)])
            .unwrap();
        assert_eq!(quiz.total_points(), u32::MAX);
    }

    #[test]
    fn choice_questions_need_exactly_one_correct_option() {
        let none = vec![QuestionOption::new("a", false), QuestionOption::new("b", false)];
        let err = Question::multiple_choice(QuestionId::new(1), "Q", none, 1).unwrap_err();
        assert_eq!(
            err,
            QuizError::CorrectOptionCount {
                question: QuestionId::new(1),
                found: 0,
            }
        );

        let two = vec![QuestionOption::new("a", true), QuestionOption::new("b", true)];
        let err = Question::multiple_choice(QuestionId::new(2), "Q", two, 1).unwrap_err();
        assert!(matches!(err, QuizError::CorrectOptionCount { found: 2, .. }));
    }

    #[test]
    fn true_false_marks_the_matching_option() {
        let q = Question::true_false(QuestionId::new(1), "Sky is blue", false, 2).unwrap();
        assert_eq!(q.correct_option(), Some(1));
        assert_eq!(q.options().len(), 2);
    }

    #[test]
    fn quiz_defaults_follow_authoring_defaults() {
        let quiz = Quiz::new(QuizId::new(1), CourseId::new(1), "Intro", vec![mc(1, 0)]).unwrap();
        assert_eq!(quiz.passing_score(), DEFAULT_PASSING_SCORE);
        assert_eq!(quiz.max_attempts().as_limit(), Some(DEFAULT_MAX_ATTEMPTS));
        assert!(!quiz.is_published());
    }

    #[test]
    fn quiz_rejects_duplicate_questions_and_bad_threshold() {
        let err = Quiz::new(QuizId::new(1), CourseId::new(1), "Dup", vec![mc(1, 0), mc(1, 1)])
            .unwrap_err();
        assert_eq!(err, QuizError::DuplicateQuestion(QuestionId::new(1)));

        let quiz = Quiz::new(QuizId::new(1), CourseId::new(1), "Intro", vec![mc(1, 0)]).unwrap();
        assert_eq!(
            quiz.with_passing_score(101).unwrap_err(),
            QuizError::InvalidPassingScore(101)
        );
    }

    #[test]
    fn publish_keeps_first_timestamp() {
        let mut quiz =
            Quiz::new(QuizId::new(1), CourseId::new(1), "Intro", vec![mc(1, 0)]).unwrap();
        let first = fixed_now();
        quiz.publish(first);
        quiz.publish(first + chrono::Duration::days(1));
        assert_eq!(quiz.published_at(), Some(first));
        quiz.unpublish();
        assert!(!quiz.is_published());
    }

    #[test]
    fn student_view_hides_answers() {
        let quiz = Quiz::new(
            QuizId::new(1),
            CourseId::new(1),
            "Intro",
            vec![mc(1, 2).with_explanation("because")],
        )
        .unwrap();
        let view = quiz.student_view();
        assert_eq!(view.questions[0].options.len(), 3);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("is_correct"));
        assert!(!json.contains("because"));
    }

    #[test]
    fn max_attempts_guard() {
        let two = MaxAttempts::limited(2).unwrap();
        assert!(two.allows(1));
        assert!(!two.allows(2));
        assert_eq!(two.remaining(1), Some(1));
        assert!(MaxAttempts::limited(0).is_none());
        assert!(MaxAttempts::Unlimited.allows(u32::MAX));
        assert_eq!(MaxAttempts::Unlimited.remaining(10), None);
    }
}
