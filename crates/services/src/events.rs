//! Domain events raised for external consumers such as the message dispatcher.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use course_core::model::{CourseId, QuizId, StudentId, TopicId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningEvent {
    TopicCompleted {
        student_id: StudentId,
        course_id: CourseId,
        topic_id: TopicId,
        at: DateTime<Utc>,
    },
    CourseCompleted {
        student_id: StudentId,
        course_id: CourseId,
        at: DateTime<Utc>,
    },
    QuizPassed {
        student_id: StudentId,
        course_id: CourseId,
        quiz_id: QuizId,
        attempt_number: u32,
        score: u8,
        at: DateTime<Utc>,
    },
}

impl LearningEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LearningEvent::TopicCompleted { .. } => "topic_completed",
            LearningEvent::CourseCompleted { .. } => "course_completed",
            LearningEvent::QuizPassed { .. } => "quiz_passed",
        }
    }
}

/// Receives events after the triggering write has been persisted.
/// Implementations must not block; delivery is fire-and-forget.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &LearningEvent);
}

/// Default sink: writes each event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &LearningEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(target: "learning_events", event = event.name(), %payload, "learning event");
    }
}

/// Keeps every event in memory. Handy for tests and local tooling.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<LearningEvent>>,
}

impl CollectingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<LearningEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingEventSink {
    fn publish(&self, event: &LearningEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}
