use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use course_core::model::{
    CompletionFact, Course, CourseId, Progress, QuizAttempt, QuizPassFact, StudentId, TopicId,
};
use course_core::outline::{CourseOutline, OutlineFacts, aggregate_progress, build_outline};
use course_core::tree::humanize_minutes;
use serde::Serialize;
use storage::repository::{
    CatalogRepository, EnrollmentRepository, ProgressRepository, StorageError,
};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::error::ProgressError;
use crate::events::{EventSink, LearningEvent, TracingEventSink};
use crate::gate::EnrollmentGate;
use crate::quiz::QuizOutcomeListener;

/// A course the student is enrolled in, merged with their progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseProgress {
    pub course_id: CourseId,
    pub title: String,
    pub topic_count: u32,
    pub duration_minutes: u32,
    pub duration: String,
    pub progress: Progress,
}

/// One saved topic, with enough context to link back into the outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkedTopic {
    pub course_id: CourseId,
    pub course_title: String,
    pub chapter_title: String,
    pub subchapter_title: String,
    pub topic_id: TopicId,
    pub topic_title: String,
}

/// Applies completion and bookmark mutations and derives progress views.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    gate: EnrollmentGate,
    catalog: Arc<dyn CatalogRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    progress: Arc<dyn ProgressRepository>,
    events: Arc<dyn EventSink>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        gate: EnrollmentGate,
        catalog: Arc<dyn CatalogRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            gate,
            catalog,
            enrollments,
            progress,
            events: Arc::new(TracingEventSink),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    async fn load_course(&self, course: CourseId) -> Result<Course, ProgressError> {
        match self.catalog.get_course(course).await {
            Ok(c) => Ok(c),
            Err(StorageError::NotFound) => Err(ProgressError::CourseNotFound(course)),
            Err(e) => Err(e.into()),
        }
    }

    /// Record that the student finished `topic` and return the updated progress.
    ///
    /// Marking an already completed topic is a successful no-op: the stored fact
    /// keeps its original timestamp and time spent.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotEnrolled`, `ProgressError::CourseNotFound`,
    /// `ProgressError::TopicNotFound` (topic not in this course's tree), or
    /// `ProgressError::SubscriptionRequired`.
    pub async fn mark_topic_complete(
        &self,
        student: StudentId,
        course: CourseId,
        topic: TopicId,
        time_spent_secs: u32,
    ) -> Result<Progress, ProgressError> {
        let enrollment = self.gate.require_enrollment(student, course).await?;
        let tree = self.load_course(course).await?;
        if !tree.contains_topic(topic) {
            return Err(ProgressError::TopicNotFound(topic));
        }

        let done = self.progress.completed_topics(student, course).await?;
        if done.contains(&topic) {
            debug!(%student, %course, %topic, "topic already completed");
            return Ok(aggregate_progress(
                &tree,
                &done,
                Some(enrollment.last_accessed_at),
            ));
        }

        self.gate.authorize_mutation(student, course).await?;

        let now = self.clock.now();
        let fact = CompletionFact {
            student_id: student,
            course_id: course,
            topic_id: topic,
            completed_at: now,
            time_spent_secs,
        };
        let created = self.progress.record_completion(&fact).await?;
        let last_accessed = if created {
            self.gate.touch(student, course, now).await?;
            enrollment.last_accessed_at.max(now)
        } else {
            enrollment.last_accessed_at
        };

        let done = self.progress.completed_topics(student, course).await?;
        let progress = aggregate_progress(&tree, &done, Some(last_accessed));

        if created {
            info!(
                %student,
                %course,
                %topic,
                percent = progress.overall_progress,
                "topic completed"
            );
            self.events.publish(&LearningEvent::TopicCompleted {
                student_id: student,
                course_id: course,
                topic_id: topic,
                at: now,
            });
            if progress.is_completed {
                info!(%student, %course, "course completed");
                self.events.publish(&LearningEvent::CourseCompleted {
                    student_id: student,
                    course_id: course,
                    at: now,
                });
            }
        } else {
            debug!(%student, %course, %topic, "concurrent completion already recorded");
        }

        Ok(progress)
    }

    /// Flip the bookmark on `topic` and return the new state.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::TopicNotFound` if no course contains the topic,
    /// `ProgressError::NotEnrolled` or `ProgressError::SubscriptionRequired` for
    /// the owning course.
    pub async fn toggle_bookmark(
        &self,
        student: StudentId,
        topic: TopicId,
    ) -> Result<bool, ProgressError> {
        let course = match self.catalog.course_for_topic(topic).await {
            Ok(course) => course,
            Err(StorageError::NotFound) => return Err(ProgressError::TopicNotFound(topic)),
            Err(e) => return Err(e.into()),
        };
        self.gate.authorize_mutation(student, course).await?;

        let active = self.progress.toggle_bookmark(student, topic).await?;
        self.gate.touch(student, course, self.clock.now()).await?;
        debug!(%student, %topic, active, "bookmark toggled");
        Ok(active)
    }

    /// # Errors
    ///
    /// Returns `ProgressError::NotEnrolled` or `ProgressError::CourseNotFound`.
    pub async fn compute_progress(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Progress, ProgressError> {
        let enrollment = self.gate.require_enrollment(student, course).await?;
        let tree = self.load_course(course).await?;
        let done = self.progress.completed_topics(student, course).await?;
        Ok(aggregate_progress(
            &tree,
            &done,
            Some(enrollment.last_accessed_at),
        ))
    }

    /// Every enrolled course with its progress, oldest enrollment first.
    ///
    /// Courses whose content no longer exists are left out.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` on backend failure.
    pub async fn list_enrolled_with_progress(
        &self,
        student: StudentId,
    ) -> Result<Vec<CourseProgress>, ProgressError> {
        let enrollments = self.enrollments.list_enrollments(student).await?;
        let mut out = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            let tree = match self.catalog.get_course(enrollment.course_id).await {
                Ok(tree) => tree,
                Err(StorageError::NotFound) => {
                    warn!(
                        %student,
                        course = %enrollment.course_id,
                        "enrolled course has no content; skipping"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let done = self
                .progress
                .completed_topics(student, enrollment.course_id)
                .await?;
            out.push(CourseProgress {
                course_id: tree.id(),
                title: tree.title().to_owned(),
                topic_count: tree.topic_count(),
                duration_minutes: tree.duration_minutes(),
                duration: humanize_minutes(tree.duration_minutes()),
                progress: aggregate_progress(&tree, &done, Some(enrollment.last_accessed_at)),
            });
        }
        Ok(out)
    }

    /// The course tree annotated with the student's completions, bookmarks and
    /// passed subchapter quizzes.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotEnrolled` or `ProgressError::CourseNotFound`.
    pub async fn course_outline(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<CourseOutline, ProgressError> {
        let enrollment = self.gate.require_enrollment(student, course).await?;
        let tree = self.load_course(course).await?;
        let completed = self.progress.completed_topics(student, course).await?;
        let bookmarked = self.progress.bookmarked_topics(student).await?;
        let passed_quizzes = self.progress.passed_quizzes(student, course).await?;
        Ok(build_outline(
            &tree,
            OutlineFacts {
                completed: &completed,
                bookmarked: &bookmarked,
                passed_quizzes: &passed_quizzes,
                last_accessed_at: Some(enrollment.last_accessed_at),
            },
        ))
    }

    /// Active bookmarks across all courses, ordered by course then topic.
    /// Bookmarks on topics that have since been removed are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` on backend failure.
    pub async fn bookmarked_topics(
        &self,
        student: StudentId,
    ) -> Result<Vec<BookmarkedTopic>, ProgressError> {
        let mut topics: Vec<_> = self
            .progress
            .bookmarked_topics(student)
            .await?
            .into_iter()
            .collect();
        topics.sort_unstable();

        let mut courses: HashMap<CourseId, Course> = HashMap::new();
        let mut out = Vec::with_capacity(topics.len());
        for topic in topics {
            let course_id = match self.catalog.course_for_topic(topic).await {
                Ok(id) => id,
                Err(StorageError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            };
            if !courses.contains_key(&course_id) {
                match self.catalog.get_course(course_id).await {
                    Ok(tree) => {
                        courses.insert(course_id, tree);
                    }
                    Err(StorageError::NotFound) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            let Some(tree) = courses.get(&course_id) else {
                continue;
            };
            if let Some(loc) = tree.find_topic(topic) {
                out.push(BookmarkedTopic {
                    course_id,
                    course_title: tree.title().to_owned(),
                    chapter_title: loc.chapter.title().to_owned(),
                    subchapter_title: loc.subchapter.title().to_owned(),
                    topic_id: topic,
                    topic_title: loc.topic.title().to_owned(),
                });
            }
        }
        out.sort_by_key(|b| (b.course_id, b.topic_id));
        Ok(out)
    }
}

#[async_trait]
impl QuizOutcomeListener for ProgressService {
    async fn quiz_passed(
        &self,
        attempt: &QuizAttempt,
        course: CourseId,
    ) -> Result<(), StorageError> {
        let at = attempt.submitted_at.unwrap_or_else(|| self.clock.now());
        let created = self
            .progress
            .record_quiz_pass(&QuizPassFact {
                student_id: attempt.student_id,
                course_id: course,
                quiz_id: attempt.quiz_id,
                passed_at: at,
            })
            .await?;
        self.enrollments
            .touch_enrollment(attempt.student_id, course, at)
            .await?;
        if created {
            self.events.publish(&LearningEvent::QuizPassed {
                student_id: attempt.student_id,
                course_id: course,
                quiz_id: attempt.quiz_id,
                attempt_number: attempt.attempt_number,
                score: attempt.score,
                at,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::gate::TopicAllowance;
    use chrono::Duration;
    use course_core::model::{
        Chapter, ChapterId, Question, QuestionId, Quiz, QuizId, Subchapter, SubchapterId, Topic,
    };
    use course_core::time::{fixed_clock, fixed_now};
    use storage::repository::Storage;

    fn course(id: u64, topic_ids: &[u64]) -> Course {
        let topics = topic_ids
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Topic::new(TopicId::new(*t), format!("Topic {t}"), u32::try_from(i).unwrap(), 10)
                    .unwrap()
            })
            .collect();
        let question = Question::true_false(QuestionId::new(1), "Slices borrow", true, 1).unwrap();
        let quiz =
            Quiz::new(QuizId::new(id * 100), CourseId::new(id), "Check", vec![question]).unwrap();
        let sub = Subchapter::new(SubchapterId::new(id), "Slices", 1, topics)
            .unwrap()
            .with_quiz(quiz);
        let chapter = Chapter::new(ChapterId::new(id), "Collections", 1, vec![sub]).unwrap();
        Course::new(CourseId::new(id), format!("Course {id}"), vec![chapter]).unwrap()
    }

    struct Fixture {
        storage: Storage,
        gate: EnrollmentGate,
        service: ProgressService,
        events: Arc<CollectingEventSink>,
    }

    async fn fixture(clock: Clock) -> Fixture {
        let storage = Storage::in_memory();
        storage.catalog.upsert_course(&course(1, &[11, 12])).await.unwrap();
        storage.catalog.upsert_course(&course(2, &[])).await.unwrap();
        let gate = EnrollmentGate::new(
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.progress),
        )
        .with_clock(clock);
        let events = Arc::new(CollectingEventSink::new());
        let service = ProgressService::new(
            clock,
            gate.clone(),
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.progress),
        )
        .with_events(events.clone());
        Fixture {
            storage,
            gate,
            service,
            events,
        }
    }

    #[tokio::test]
    async fn completion_requires_enrollment() {
        let fx = fixture(fixed_clock()).await;
        let err = fx
            .service
            .mark_topic_complete(StudentId::random(), CourseId::new(1), TopicId::new(11), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::NotEnrolled(_)));
    }

    #[tokio::test]
    async fn topic_from_another_course_is_rejected() {
        let fx = fixture(fixed_clock()).await;
        let student = StudentId::random();
        fx.gate.ensure_enrolled(student, CourseId::new(2)).await.unwrap();
        let err = fx
            .service
            .mark_topic_complete(student, CourseId::new(2), TopicId::new(11), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::TopicNotFound(t) if t == TopicId::new(11)));
    }

    #[tokio::test]
    async fn completion_is_idempotent_and_emits_events_once() {
        let fx = fixture(fixed_clock()).await;
        let student = StudentId::random();
        let course_id = CourseId::new(1);
        fx.gate.ensure_enrolled(student, course_id).await.unwrap();

        let first = fx
            .service
            .mark_topic_complete(student, course_id, TopicId::new(11), 30)
            .await
            .unwrap();
        let again = fx
            .service
            .mark_topic_complete(student, course_id, TopicId::new(11), 99)
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(first.overall_progress, 50);

        let done = fx
            .service
            .mark_topic_complete(student, course_id, TopicId::new(12), 30)
            .await
            .unwrap();
        assert!(done.is_completed);

        let names: Vec<_> = fx.events.events().iter().map(LearningEvent::name).collect();
        assert_eq!(
            names,
            vec!["topic_completed", "topic_completed", "course_completed"]
        );
    }

    #[tokio::test]
    async fn empty_course_has_zero_progress() {
        let fx = fixture(fixed_clock()).await;
        let student = StudentId::random();
        fx.gate.ensure_enrolled(student, CourseId::new(2)).await.unwrap();
        let progress = fx
            .service
            .compute_progress(student, CourseId::new(2))
            .await
            .unwrap();
        assert_eq!(progress.total_topics, 0);
        assert_eq!(progress.overall_progress, 0);
        assert!(!progress.is_completed);
    }

    #[tokio::test]
    async fn last_accessed_moves_with_new_completions_only() {
        let mut clock = fixed_clock();
        let fx = fixture(clock).await;
        let student = StudentId::random();
        let course_id = CourseId::new(1);
        fx.gate.ensure_enrolled(student, course_id).await.unwrap();

        clock.advance(Duration::hours(2));
        let later = ProgressService::new(
            clock,
            fx.gate.clone(),
            Arc::clone(&fx.storage.catalog),
            Arc::clone(&fx.storage.enrollments),
            Arc::clone(&fx.storage.progress),
        );
        let progress = later
            .mark_topic_complete(student, course_id, TopicId::new(11), 1)
            .await
            .unwrap();
        assert_eq!(progress.last_accessed_at, Some(clock.now()));

        let progress = fx
            .service
            .mark_topic_complete(student, course_id, TopicId::new(11), 1)
            .await
            .unwrap();
        assert_eq!(progress.last_accessed_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn bookmark_toggles_and_lists() {
        let fx = fixture(fixed_clock()).await;
        let student = StudentId::random();
        fx.gate.ensure_enrolled(student, CourseId::new(1)).await.unwrap();

        assert!(fx.service.toggle_bookmark(student, TopicId::new(12)).await.unwrap());
        let listed = fx.service.bookmarked_topics(student).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].topic_title, "Topic 12");
        assert_eq!(listed[0].subchapter_title, "Slices");

        assert!(!fx.service.toggle_bookmark(student, TopicId::new(12)).await.unwrap());
        assert!(fx.service.bookmarked_topics(student).await.unwrap().is_empty());

        let err = fx
            .service
            .toggle_bookmark(student, TopicId::new(404))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn listing_skips_courses_without_content() {
        let fx = fixture(fixed_clock()).await;
        let student = StudentId::random();
        fx.gate.ensure_enrolled(student, CourseId::new(1)).await.unwrap();
        fx.storage
            .enrollments
            .ensure_enrollment(student, CourseId::new(77), fixed_now())
            .await
            .unwrap();

        let listed = fx.service.list_enrolled_with_progress(student).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].course_id, CourseId::new(1));
        assert_eq!(listed[0].topic_count, 2);
        assert_eq!(listed[0].duration_minutes, 20);
        assert_eq!(listed[0].duration, "20m");
    }

    #[tokio::test]
    async fn outline_reflects_quiz_pass() {
        let fx = fixture(fixed_clock()).await;
        let student = StudentId::random();
        let course_id = CourseId::new(1);
        fx.gate.ensure_enrolled(student, course_id).await.unwrap();
        for topic in [11, 12] {
            fx.service
                .mark_topic_complete(student, course_id, TopicId::new(topic), 1)
                .await
                .unwrap();
        }

        let outline = fx.service.course_outline(student, course_id).await.unwrap();
        assert!(!outline.chapters[0].subchapters[0].is_completed);

        let mut attempt = QuizAttempt::started(student, QuizId::new(100), 1, fixed_now());
        attempt.passed = true;
        attempt.score = 100;
        fx.service.quiz_passed(&attempt, course_id).await.unwrap();
        fx.service.quiz_passed(&attempt, course_id).await.unwrap();

        let outline = fx.service.course_outline(student, course_id).await.unwrap();
        let sub = &outline.chapters[0].subchapters[0];
        assert!(sub.quiz_passed);
        assert!(sub.is_completed);
        assert!(outline.chapters[0].is_completed);

        let passes = fx
            .events
            .events()
            .iter()
            .filter(|e| e.name() == "quiz_passed")
            .count();
        assert_eq!(passes, 1);
    }

    #[tokio::test]
    async fn exhausted_preview_blocks_new_completions_but_not_reads() {
        let fx = fixture(fixed_clock()).await;
        let gate = fx
            .gate
            .clone()
            .with_preview_policy(Arc::new(TopicAllowance { topics: 1 }));
        let service = ProgressService::new(
            fixed_clock(),
            gate.clone(),
            Arc::clone(&fx.storage.catalog),
            Arc::clone(&fx.storage.enrollments),
            Arc::clone(&fx.storage.progress),
        );
        let student = StudentId::random();
        let course_id = CourseId::new(1);
        gate.ensure_enrolled(student, course_id).await.unwrap();

        service
            .mark_topic_complete(student, course_id, TopicId::new(11), 1)
            .await
            .unwrap();
        let err = service
            .mark_topic_complete(student, course_id, TopicId::new(12), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::SubscriptionRequired(_)));

        // re-marking a finished topic stays a no-op
        service
            .mark_topic_complete(student, course_id, TopicId::new(11), 1)
            .await
            .unwrap();
        let progress = service.compute_progress(student, course_id).await.unwrap();
        assert_eq!(progress.completed_topics, 1);
    }
}
