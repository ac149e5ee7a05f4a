use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::ids::{ChapterId, CourseId, QuizId, SubchapterId, TopicId};
use crate::model::quiz::{Quiz, QuizError, QuizPlacement};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContentError {
    #[error("title cannot be empty")]
    EmptyTitle,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("topic {0} appears more than once in the course tree")]
    DuplicateTopic(TopicId),

    #[error("embedded quiz {quiz} does not belong to course {course}")]
    QuizCourseMismatch { quiz: QuizId, course: CourseId },

    #[error(transparent)]
    Quiz(#[from] QuizError),
}

fn require_title(title: impl Into<String>) -> Result<String, ContentError> {
    let title = title.into().trim().to_owned();
    if title.is_empty() {
        return Err(ContentError::EmptyTitle);
    }
    Ok(title)
}

fn require_url(raw: impl Into<String>) -> Result<String, ContentError> {
    let raw = raw.into().trim().to_owned();
    Url::parse(&raw).map_err(|_| ContentError::InvalidUrl(raw.clone()))?;
    Ok(raw)
}

//
// ─── RESOURCES ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    Link,
    Document,
    Video,
}

/// Supplementary material attached to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    title: String,
    url: String,
    kind: ResourceKind,
}

impl Resource {
    /// # Errors
    ///
    /// Returns `ContentError` if the title is blank or the url does not parse.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        kind: ResourceKind,
    ) -> Result<Self, ContentError> {
        Ok(Self {
            title: require_title(title)?,
            url: require_url(url)?,
            kind,
        })
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

//
// ─── TOPIC ─────────────────────────────────────────────────────────────────────
//

/// Leaf of the content tree: one lesson a student can complete or bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    id: TopicId,
    title: String,
    order: u32,
    duration_minutes: u32,
    video_url: Option<String>,
    #[serde(default)]
    resources: Vec<Resource>,
}

impl Topic {
    /// # Errors
    ///
    /// Returns `ContentError::EmptyTitle` if the title is blank.
    pub fn new(
        id: TopicId,
        title: impl Into<String>,
        order: u32,
        duration_minutes: u32,
    ) -> Result<Self, ContentError> {
        Ok(Self {
            id,
            title: require_title(title)?,
            order,
            duration_minutes,
            video_url: None,
            resources: Vec::new(),
        })
    }

    /// Attach a video reference.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::InvalidUrl` if the url does not parse.
    pub fn with_video(mut self, url: impl Into<String>) -> Result<Self, ContentError> {
        self.video_url = Some(require_url(url)?);
        Ok(self)
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    #[must_use]
    pub fn id(&self) -> TopicId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    #[must_use]
    pub fn video_url(&self) -> Option<&str> {
        self.video_url.as_deref()
    }

    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }
}

//
// ─── SUBCHAPTER / CHAPTER ──────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subchapter {
    id: SubchapterId,
    title: String,
    order: u32,
    topics: Vec<Topic>,
    quiz: Option<Quiz>,
}

impl Subchapter {
    /// Topics are kept sorted by their order index.
    ///
    /// # Errors
    ///
    /// Returns `ContentError::EmptyTitle` if the title is blank.
    pub fn new(
        id: SubchapterId,
        title: impl Into<String>,
        order: u32,
        mut topics: Vec<Topic>,
    ) -> Result<Self, ContentError> {
        topics.sort_by_key(Topic::order);
        Ok(Self {
            id,
            title: require_title(title)?,
            order,
            topics,
            quiz: None,
        })
    }

    /// Embed a legacy per-subchapter quiz. Its placement is pinned to this subchapter.
    #[must_use]
    pub fn with_quiz(mut self, quiz: Quiz) -> Self {
        self.quiz = Some(quiz.placed(QuizPlacement::Subchapter(self.id)));
        self
    }

    #[must_use]
    pub fn id(&self) -> SubchapterId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    #[must_use]
    pub fn quiz(&self) -> Option<&Quiz> {
        self.quiz.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    id: ChapterId,
    title: String,
    order: u32,
    subchapters: Vec<Subchapter>,
}

impl Chapter {
    /// # Errors
    ///
    /// Returns `ContentError::EmptyTitle` if the title is blank.
    pub fn new(
        id: ChapterId,
        title: impl Into<String>,
        order: u32,
        mut subchapters: Vec<Subchapter>,
    ) -> Result<Self, ContentError> {
        subchapters.sort_by_key(Subchapter::order);
        Ok(Self {
            id,
            title: require_title(title)?,
            order,
            subchapters,
        })
    }

    #[must_use]
    pub fn id(&self) -> ChapterId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn subchapters(&self) -> &[Subchapter] {
        &self.subchapters
    }
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

/// Root of the content tree. Authored elsewhere; read-only inside this workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    id: CourseId,
    title: String,
    chapters: Vec<Chapter>,
}

impl Course {
    /// Build a course and check tree-wide invariants.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` if the title is blank, a topic id repeats, or an
    /// embedded quiz is invalid or owned by another course.
    pub fn new(
        id: CourseId,
        title: impl Into<String>,
        mut chapters: Vec<Chapter>,
    ) -> Result<Self, ContentError> {
        chapters.sort_by_key(Chapter::order);
        let course = Self {
            id,
            title: require_title(title)?,
            chapters,
        };
        course.validate()?;
        Ok(course)
    }

    /// Re-check invariants on a course loaded from persistence.
    ///
    /// # Errors
    ///
    /// See [`Course::new`].
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.title.trim().is_empty() {
            return Err(ContentError::EmptyTitle);
        }

        let mut seen = HashSet::new();
        for topic in self.topics() {
            if !seen.insert(topic.id()) {
                return Err(ContentError::DuplicateTopic(topic.id()));
            }
        }

        for quiz in self.embedded_quizzes() {
            if quiz.course_id() != self.id {
                return Err(ContentError::QuizCourseMismatch {
                    quiz: quiz.id(),
                    course: self.id,
                });
            }
            quiz.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::QuestionId;
    use crate::model::quiz::Question;

    fn topic(id: u64, order: u32) -> Topic {
        Topic::new(TopicId::new(id), format!("Topic {id}"), order, 10).unwrap()
    }

    #[test]
    fn children_are_sorted_by_order() {
        let sub = Subchapter::new(
            SubchapterId::new(1),
            "Basics",
            1,
            vec![topic(2, 2), topic(1, 1)],
        )
        .unwrap();
        let ids: Vec<_> = sub.topics().iter().map(Topic::id).collect();
        assert_eq!(ids, vec![TopicId::new(1), TopicId::new(2)]);
    }

    #[test]
    fn blank_titles_are_rejected() {
        let err = Topic::new(TopicId::new(1), "   ", 1, 5).unwrap_err();
        assert_eq!(err, ContentError::EmptyTitle);
    }

    #[test]
    fn resource_requires_parsable_url() {
        assert!(Resource::new("Docs", "https://doc.rust-lang.org", ResourceKind::Link).is_ok());
        let err = Resource::new("Docs", "not a url", ResourceKind::Document).unwrap_err();
        assert!(matches!(err, ContentError::InvalidUrl(_)));
    }

    #[test]
    fn duplicate_topics_across_subchapters_are_rejected() {
        let a = Subchapter::new(SubchapterId::new(1), "A", 1, vec![topic(1, 1)]).unwrap();
        let b = Subchapter::new(SubchapterId::new(2), "B", 2, vec![topic(1, 1)]).unwrap();
        let chapter = Chapter::new(ChapterId::new(1), "Ch", 1, vec![a, b]).unwrap();
        let err = Course::new(CourseId::new(1), "Course", vec![chapter]).unwrap_err();
        assert_eq!(err, ContentError::DuplicateTopic(TopicId::new(1)));
    }

    #[test]
    fn embedded_quiz_must_belong_to_course() {
        let question = Question::true_false(QuestionId::new(1), "Rust is memory safe", true, 1)
            .unwrap();
        let quiz = Quiz::new(QuizId::new(9), CourseId::new(2), "Check", vec![question]).unwrap();
        let sub = Subchapter::new(SubchapterId::new(1), "A", 1, vec![topic(1, 1)])
            .unwrap()
            .with_quiz(quiz);
        let chapter = Chapter::new(ChapterId::new(1), "Ch", 1, vec![sub]).unwrap();

        let err = Course::new(CourseId::new(1), "Course", vec![chapter]).unwrap_err();
        assert_eq!(
            err,
            ContentError::QuizCourseMismatch {
                quiz: QuizId::new(9),
                course: CourseId::new(1),
            }
        );
    }
}
