//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::{AnswerError, CourseId, QuizId, TopicId};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Flat classification shared by every service error, for callers that map
/// failures to user-facing messages or status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotEnrolled,
    TopicNotFound,
    CourseNotFound,
    QuizNotFound,
    AttemptNotFound,
    MaxAttemptsExceeded,
    Validation,
    SubscriptionRequired,
    Storage,
}

impl ErrorKind {
    /// Whether retrying the same call could succeed without outside changes.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Storage)
    }
}

/// Errors emitted by `EnrollmentGate`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GateError {
    #[error("student is not enrolled in course {0}")]
    NotEnrolled(CourseId),
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("an active subscription is required for course {0}")]
    SubscriptionRequired(CourseId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GateError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::NotEnrolled(_) => ErrorKind::NotEnrolled,
            GateError::CourseNotFound(_) => ErrorKind::CourseNotFound,
            GateError::SubscriptionRequired(_) => ErrorKind::SubscriptionRequired,
            GateError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("student is not enrolled in course {0}")]
    NotEnrolled(CourseId),
    #[error("topic {0} not found")]
    TopicNotFound(TopicId),
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("an active subscription is required for course {0}")]
    SubscriptionRequired(CourseId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProgressError::NotEnrolled(_) => ErrorKind::NotEnrolled,
            ProgressError::TopicNotFound(_) => ErrorKind::TopicNotFound,
            ProgressError::CourseNotFound(_) => ErrorKind::CourseNotFound,
            ProgressError::SubscriptionRequired(_) => ErrorKind::SubscriptionRequired,
            ProgressError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<GateError> for ProgressError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NotEnrolled(course) => ProgressError::NotEnrolled(course),
            GateError::CourseNotFound(course) => ProgressError::CourseNotFound(course),
            GateError::SubscriptionRequired(course) => ProgressError::SubscriptionRequired(course),
            GateError::Storage(e) => ProgressError::Storage(e),
        }
    }
}

/// Errors emitted by `QuizAttemptService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizAttemptError {
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),
    #[error("student is not enrolled in course {0}")]
    NotEnrolled(CourseId),
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("an active subscription is required for course {0}")]
    SubscriptionRequired(CourseId),
    #[error("no attempt in progress for quiz {0}")]
    AttemptNotFound(QuizId),
    #[error("quiz {quiz} allows {max} attempts and all have been used")]
    MaxAttemptsExceeded { quiz: QuizId, max: u32 },
    #[error(transparent)]
    Validation(#[from] AnswerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QuizAttemptError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuizAttemptError::QuizNotFound(_) => ErrorKind::QuizNotFound,
            QuizAttemptError::NotEnrolled(_) => ErrorKind::NotEnrolled,
            QuizAttemptError::CourseNotFound(_) => ErrorKind::CourseNotFound,
            QuizAttemptError::SubscriptionRequired(_) => ErrorKind::SubscriptionRequired,
            QuizAttemptError::AttemptNotFound(_) => ErrorKind::AttemptNotFound,
            QuizAttemptError::MaxAttemptsExceeded { .. } => ErrorKind::MaxAttemptsExceeded,
            QuizAttemptError::Validation(_) => ErrorKind::Validation,
            QuizAttemptError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<GateError> for QuizAttemptError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NotEnrolled(course) => QuizAttemptError::NotEnrolled(course),
            GateError::CourseNotFound(course) => QuizAttemptError::CourseNotFound(course),
            GateError::SubscriptionRequired(course) => {
                QuizAttemptError::SubscriptionRequired(course)
            }
            GateError::Storage(e) => QuizAttemptError::Storage(e),
        }
    }
}

/// Errors from reading service configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} must be a boolean, got {raw:?}")]
    InvalidBool { var: &'static str, raw: String },
    #[error("{var} must be a non-negative integer, got {raw:?}")]
    InvalidNumber { var: &'static str, raw: String },
}

/// Errors emitted while bootstrapping the learning services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LearningServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
