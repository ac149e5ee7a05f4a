use thiserror::Error;

use crate::model::{AnswerError, AttemptError, ContentError, QuizError};

/// Umbrella error for callers that do not care which domain rule failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
}
