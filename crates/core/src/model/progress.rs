use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{CourseId, QuizId, StudentId, TopicId};

/// A student finished a topic. Created at most once per (student, topic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionFact {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub topic_id: TopicId,
    pub completed_at: DateTime<Utc>,
    pub time_spent_secs: u32,
}

/// A student passed a quiz at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizPassFact {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub quiz_id: QuizId,
    pub passed_at: DateTime<Utc>,
}

/// Derived completion view for a (student, course) pair.
///
/// Never stored as a counter; always recomputed from the content tree and
/// completion facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub course_id: CourseId,
    pub total_topics: u32,
    pub completed_topics: u32,
    pub overall_progress: u8,
    pub is_completed: bool,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl Progress {
    /// Build the view from raw counts. `completed` is clamped to `total`.
    #[must_use]
    pub fn from_counts(
        course_id: CourseId,
        total: u32,
        completed: u32,
        last_accessed_at: Option<DateTime<Utc>>,
    ) -> Self {
        let completed = completed.min(total);
        Self {
            course_id,
            total_topics: total,
            completed_topics: completed,
            overall_progress: rounded_percent(completed, total),
            is_completed: total > 0 && completed == total,
            last_accessed_at,
        }
    }
}

/// `round(part / whole * 100)` with halves rounded up; 0 when `whole` is 0.
#[must_use]
pub fn rounded_percent(part: u32, whole: u32) -> u8 {
    if whole == 0 {
        return 0;
    }
    let part = u64::from(part.min(whole));
    let whole = u64::from(whole);
    let pct = (part * 200 + whole) / (whole * 2);
    u8::try_from(pct).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_topics_is_zero_percent_and_not_completed() {
        let p = Progress::from_counts(CourseId::new(1), 0, 0, None);
        assert_eq!(p.overall_progress, 0);
        assert!(!p.is_completed);
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(rounded_percent(1, 2), 50);
        assert_eq!(rounded_percent(1, 3), 33);
        assert_eq!(rounded_percent(2, 3), 67);
        assert_eq!(rounded_percent(1, 8), 13);
        assert_eq!(rounded_percent(5, 5), 100);
    }

    #[test]
    fn completed_only_when_every_topic_done() {
        let p = Progress::from_counts(CourseId::new(1), 4, 3, None);
        assert_eq!(p.overall_progress, 75);
        assert!(!p.is_completed);
        let p = Progress::from_counts(CourseId::new(1), 4, 4, None);
        assert!(p.is_completed);
    }
}
