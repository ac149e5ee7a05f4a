#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod progress;
pub mod quiz;

pub use course_core::Clock;

pub use app_services::LearningServices;
pub use config::ServicesConfig;
pub use error::{
    ConfigError, ErrorKind, GateError, LearningServicesError, ProgressError, QuizAttemptError,
};
pub use events::{CollectingEventSink, EventSink, LearningEvent, TracingEventSink};
pub use gate::{EnrollmentGate, PreviewPolicy, TopicAllowance, UnlimitedPreview};
pub use progress::{BookmarkedTopic, CourseProgress, ProgressService};
pub use quiz::{
    AttemptResult, QuizAttemptService, QuizOutcomeListener, QuizSummary, StartedAttempt,
};
