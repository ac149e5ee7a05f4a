//! Depth-first traversal over the content tree.
//!
//! Everything here is read-only and order-preserving: chapters, then their
//! subchapters, then their topics, each in authored order.

use crate::model::{Chapter, Course, Quiz, QuizId, Subchapter, Topic, TopicId};

/// Where a topic sits inside its course.
#[derive(Debug, Clone, Copy)]
pub struct TopicLocation<'a> {
    pub chapter: &'a Chapter,
    pub subchapter: &'a Subchapter,
    pub topic: &'a Topic,
}

impl Course {
    /// All topics, depth-first in authored order.
    pub fn topics(&self) -> impl Iterator<Item = &Topic> + '_ {
        self.chapters()
            .iter()
            .flat_map(Chapter::subchapters)
            .flat_map(Subchapter::topics)
    }

    /// All topics with their enclosing chapter and subchapter.
    pub fn topic_locations(&self) -> impl Iterator<Item = TopicLocation<'_>> + '_ {
        self.chapters().iter().flat_map(|chapter| {
            chapter.subchapters().iter().flat_map(move |subchapter| {
                subchapter.topics().iter().map(move |topic| TopicLocation {
                    chapter,
                    subchapter,
                    topic,
                })
            })
        })
    }

    pub fn subchapters(&self) -> impl Iterator<Item = &Subchapter> + '_ {
        self.chapters().iter().flat_map(Chapter::subchapters)
    }

    /// Quizzes embedded in subchapters (the legacy placement).
    pub fn embedded_quizzes(&self) -> impl Iterator<Item = &Quiz> + '_ {
        self.subchapters().filter_map(Subchapter::quiz)
    }

    #[must_use]
    pub fn find_topic(&self, id: TopicId) -> Option<TopicLocation<'_>> {
        self.topic_locations().find(|loc| loc.topic.id() == id)
    }

    #[must_use]
    pub fn contains_topic(&self, id: TopicId) -> bool {
        self.topics().any(|t| t.id() == id)
    }

    #[must_use]
    pub fn embedded_quiz(&self, id: QuizId) -> Option<&Quiz> {
        self.embedded_quizzes().find(|q| q.id() == id)
    }

    #[must_use]
    pub fn topic_count(&self) -> u32 {
        u32::try_from(self.topics().count()).unwrap_or(u32::MAX)
    }

    /// Sum of topic durations in minutes.
    #[must_use]
    pub fn duration_minutes(&self) -> u32 {
        self.chapters()
            .iter()
            .map(Chapter::duration_minutes)
            .fold(0, u32::saturating_add)
    }
}

impl Chapter {
    #[must_use]
    pub fn duration_minutes(&self) -> u32 {
        self.subchapters()
            .iter()
            .flat_map(Subchapter::topics)
            .map(Topic::duration_minutes)
            .fold(0, u32::saturating_add)
    }

    #[must_use]
    pub fn topic_count(&self) -> u32 {
        let count: usize = self.subchapters().iter().map(|s| s.topics().len()).sum();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

/// Render minutes the way course cards show them: `0m`, `45m`, `2h`, `1h 5m`.
#[must_use]
pub fn humanize_minutes(minutes: u32) -> String {
    let (h, m) = (minutes / 60, minutes % 60);
    match (h, m) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}
