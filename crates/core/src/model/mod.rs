mod attempt;
mod content;
mod enrollment;
mod ids;
mod progress;
mod quiz;

pub use attempt::{
    Answer, AnswerError, AttemptError, AttemptStatus, GradedAnswer, QuizAttempt, validate_answers,
};
pub use content::{Chapter, ContentError, Course, Resource, ResourceKind, Subchapter, Topic};
pub use enrollment::{
    Enrollment, MONTHLY_PERIOD_DAYS, PaymentMethod, Subscription, SubscriptionType,
};
pub use ids::{
    ChapterId, CourseId, ParseIdError, QuestionId, QuizId, StudentId, SubchapterId, TopicId,
};
pub use progress::{CompletionFact, Progress, QuizPassFact, rounded_percent};
pub use quiz::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PASSING_SCORE, Difficulty, MaxAttempts, Question,
    QuestionOption, QuestionType, QuestionView, Quiz, QuizError, QuizPlacement, QuizView,
};
