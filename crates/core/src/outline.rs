//! Per-student views over a course: the progress figure and the annotated outline.
//!
//! Both are pure functions of the content tree and the student's facts, so
//! services load facts once and derive everything here.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{
    Chapter, ChapterId, Course, CourseId, Progress, QuizId, Subchapter, SubchapterId, TopicId,
};
use crate::tree::humanize_minutes;

/// Count completed topics that still exist in the tree and derive the percentage.
///
/// Facts for topics removed from the course after completion are ignored.
#[must_use]
pub fn aggregate_progress(
    course: &Course,
    completed: &HashSet<TopicId>,
    last_accessed_at: Option<DateTime<Utc>>,
) -> Progress {
    let mut total = 0_u32;
    let mut done = 0_u32;
    for topic in course.topics() {
        total = total.saturating_add(1);
        if completed.contains(&topic.id()) {
            done = done.saturating_add(1);
        }
    }
    Progress::from_counts(course.id(), total, done, last_accessed_at)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicState {
    pub id: TopicId,
    pub title: String,
    pub duration_minutes: u32,
    pub video_url: Option<String>,
    pub is_completed: bool,
    pub is_bookmarked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubchapterOutline {
    pub id: SubchapterId,
    pub title: String,
    pub topics: Vec<TopicState>,
    pub quiz_id: Option<QuizId>,
    pub quiz_passed: bool,
    /// Every topic done and the embedded quiz, if any, passed.
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterOutline {
    pub id: ChapterId,
    pub title: String,
    pub duration_minutes: u32,
    /// `duration_minutes` as `1h 5m`.
    pub duration: String,
    pub subchapters: Vec<SubchapterOutline>,
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseOutline {
    pub course_id: CourseId,
    pub title: String,
    pub duration_minutes: u32,
    pub duration: String,
    pub chapters: Vec<ChapterOutline>,
    pub progress: Progress,
}

/// Student-specific facts an outline is annotated with.
#[derive(Debug, Clone, Copy)]
pub struct OutlineFacts<'a> {
    pub completed: &'a HashSet<TopicId>,
    pub bookmarked: &'a HashSet<TopicId>,
    pub passed_quizzes: &'a HashSet<QuizId>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

#[must_use]
pub fn build_outline(course: &Course, facts: OutlineFacts<'_>) -> CourseOutline {
    CourseOutline {
        course_id: course.id(),
        title: course.title().to_owned(),
        duration_minutes: course.duration_minutes(),
        duration: humanize_minutes(course.duration_minutes()),
        chapters: course
            .chapters()
            .iter()
            .map(|c| chapter_outline(c, facts))
            .collect(),
        progress: aggregate_progress(course, facts.completed, facts.last_accessed_at),
    }
}

fn chapter_outline(chapter: &Chapter, facts: OutlineFacts<'_>) -> ChapterOutline {
    let subchapters: Vec<_> = chapter
        .subchapters()
        .iter()
        .map(|s| subchapter_outline(s, facts))
        .collect();
    ChapterOutline {
        id: chapter.id(),
        title: chapter.title().to_owned(),
        duration_minutes: chapter.duration_minutes(),
        duration: humanize_minutes(chapter.duration_minutes()),
        is_completed: !subchapters.is_empty() && subchapters.iter().all(|s| s.is_completed),
        subchapters,
    }
}

fn subchapter_outline(sub: &Subchapter, facts: OutlineFacts<'_>) -> SubchapterOutline {
    let topics: Vec<_> = sub
        .topics()
        .iter()
        .map(|t| TopicState {
            id: t.id(),
            title: t.title().to_owned(),
            duration_minutes: t.duration_minutes(),
            video_url: t.video_url().map(str::to_owned),
            is_completed: facts.completed.contains(&t.id()),
            is_bookmarked: facts.bookmarked.contains(&t.id()),
        })
        .collect();
    let quiz_id = sub.quiz().map(|q| q.id());
    let quiz_passed = quiz_id.is_some_and(|id| facts.passed_quizzes.contains(&id));
    let topics_done = !topics.is_empty() && topics.iter().all(|t| t.is_completed);
    SubchapterOutline {
        id: sub.id(),
        title: sub.title().to_owned(),
        is_completed: topics_done && (quiz_id.is_none() || quiz_passed),
        topics,
        quiz_id,
        quiz_passed,
    }
}
