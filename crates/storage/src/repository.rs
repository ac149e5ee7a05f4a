use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{
    AttemptStatus, CompletionFact, Course, CourseId, Enrollment, MaxAttempts, Quiz, QuizAttempt,
    QuizId, QuizPassFact, StudentId, Subscription, TopicId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result of asking storage for the next attempt slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptAllocation {
    /// A fresh in-progress attempt was created.
    Started(QuizAttempt),
    /// The ceiling was already met; nothing was written.
    LimitReached { existing: u32 },
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Read model of the content tree and quiz definitions, fed by the course catalog.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Persist or replace a course tree, re-indexing its topics and embedded quizzes.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if one of its topics already belongs to
    /// another course, or other storage errors.
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError>;

    /// Resolve the course that owns a topic.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no course contains the topic.
    async fn course_for_topic(&self, topic: TopicId) -> Result<CourseId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the quiz cannot be stored.
    async fn upsert_quiz(&self, quiz: &Quiz) -> Result<(), StorageError>;

    /// Fetch a standalone or embedded quiz, published or not.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError>;

    /// All quizzes owned by a course, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn quizzes_for_course(&self, course: CourseId) -> Result<Vec<Quiz>, StorageError>;
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Insert the enrollment if absent. Returns the stored record and whether it was created.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn ensure_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(Enrollment, bool), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// Enrollments of one student, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_enrollments(&self, student: StudentId) -> Result<Vec<Enrollment>, StorageError>;

    /// Move `last_accessed_at` forward to `at`. Never moves it backwards.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the student is not enrolled.
    async fn touch_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get_subscription(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Option<Subscription>, StorageError>;

    /// Store the subscription, replacing any previous one for the same pair.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Create the fact if none exists for (student, topic). Returns whether it was created.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn record_completion(&self, fact: &CompletionFact) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn completed_topics(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<HashSet<TopicId>, StorageError>;

    /// Flip the bookmark and return the new state. The first toggle activates it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn toggle_bookmark(&self, student: StudentId, topic: TopicId)
    -> Result<bool, StorageError>;

    /// Active bookmarks of a student across all courses.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn bookmarked_topics(&self, student: StudentId) -> Result<HashSet<TopicId>, StorageError>;

    /// Record the first pass of a quiz. Returns whether it was created.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn record_quiz_pass(&self, fact: &QuizPassFact) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn passed_quizzes(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<HashSet<QuizId>, StorageError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Atomically check the ceiling, abandon any in-progress attempt, and insert the
    /// next numbered attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a concurrent writer took the slot, or other
    /// storage errors.
    async fn start_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
        max_attempts: MaxAttempts,
        at: DateTime<Utc>,
    ) -> Result<AttemptAllocation, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn in_progress_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
    ) -> Result<Option<QuizAttempt>, StorageError>;

    /// Persist a graded attempt over its in-progress row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored attempt is no longer in progress,
    /// `StorageError::NotFound` if it does not exist.
    async fn record_graded(&self, attempt: &QuizAttempt) -> Result<(), StorageError>;

    /// All attempts ordered by attempt number.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_attempts(
        &self,
        student: StudentId,
        quiz: QuizId,
    ) -> Result<Vec<QuizAttempt>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
        attempt_number: u32,
    ) -> Result<QuizAttempt, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct CatalogState {
    courses: HashMap<CourseId, Course>,
    topics: HashMap<TopicId, CourseId>,
    quizzes: HashMap<QuizId, Quiz>,
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Every multi-step write happens under a single lock, so it is atomic with
/// respect to concurrent callers.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    catalog: Arc<Mutex<CatalogState>>,
    enrollments: Arc<Mutex<HashMap<(StudentId, CourseId), Enrollment>>>,
    subscriptions: Arc<Mutex<HashMap<(StudentId, CourseId), Subscription>>>,
    completions: Arc<Mutex<HashMap<(StudentId, TopicId), CompletionFact>>>,
    bookmarks: Arc<Mutex<HashMap<(StudentId, TopicId), bool>>>,
    quiz_passes: Arc<Mutex<HashMap<(StudentId, QuizId), QuizPassFact>>>,
    attempts: Arc<Mutex<HashMap<(StudentId, QuizId), Vec<QuizAttempt>>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        let mut guard = self.catalog.lock().map_err(poisoned)?;
        let claimed_elsewhere = course.topics().any(|t| {
            guard
                .topics
                .get(&t.id())
                .is_some_and(|owner| *owner != course.id())
        });
        if claimed_elsewhere {
            return Err(StorageError::Conflict);
        }

        guard.topics.retain(|_, owner| *owner != course.id());
        for topic in course.topics() {
            guard.topics.insert(topic.id(), course.id());
        }
        for quiz in course.embedded_quizzes() {
            guard.quizzes.insert(quiz.id(), quiz.clone());
        }
        guard.courses.insert(course.id(), course.clone());
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError> {
        let guard = self.catalog.lock().map_err(poisoned)?;
        guard.courses.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn course_for_topic(&self, topic: TopicId) -> Result<CourseId, StorageError> {
        let guard = self.catalog.lock().map_err(poisoned)?;
        guard.topics.get(&topic).copied().ok_or(StorageError::NotFound)
    }

    async fn upsert_quiz(&self, quiz: &Quiz) -> Result<(), StorageError> {
        let mut guard = self.catalog.lock().map_err(poisoned)?;
        guard.quizzes.insert(quiz.id(), quiz.clone());
        Ok(())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError> {
        let guard = self.catalog.lock().map_err(poisoned)?;
        guard.quizzes.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn quizzes_for_course(&self, course: CourseId) -> Result<Vec<Quiz>, StorageError> {
        let guard = self.catalog.lock().map_err(poisoned)?;
        let mut quizzes: Vec<Quiz> = guard
            .quizzes
            .values()
            .filter(|q| q.course_id() == course)
            .cloned()
            .collect();
        quizzes.sort_by_key(Quiz::id);
        Ok(quizzes)
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn ensure_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(Enrollment, bool), StorageError> {
        let mut guard = self.enrollments.lock().map_err(poisoned)?;
        let mut created = false;
        let enrollment = guard.entry((student, course)).or_insert_with(|| {
            created = true;
            Enrollment::new(student, course, at)
        });
        Ok((enrollment.clone(), created))
    }

    async fn get_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let guard = self.enrollments.lock().map_err(poisoned)?;
        Ok(guard.get(&(student, course)).cloned())
    }

    async fn list_enrollments(&self, student: StudentId) -> Result<Vec<Enrollment>, StorageError> {
        let guard = self.enrollments.lock().map_err(poisoned)?;
        let mut out: Vec<Enrollment> = guard
            .values()
            .filter(|e| e.student_id == student)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.enrolled_at, e.course_id));
        Ok(out)
    }

    async fn touch_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self.enrollments.lock().map_err(poisoned)?;
        let enrollment = guard
            .get_mut(&(student, course))
            .ok_or(StorageError::NotFound)?;
        enrollment.last_accessed_at = enrollment.last_accessed_at.max(at);
        Ok(())
    }

    async fn get_subscription(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Option<Subscription>, StorageError> {
        let guard = self.subscriptions.lock().map_err(poisoned)?;
        Ok(guard.get(&(student, course)).cloned())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        let mut guard = self.subscriptions.lock().map_err(poisoned)?;
        guard.insert(
            (subscription.student_id, subscription.course_id),
            subscription.clone(),
        );
        Ok(())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn record_completion(&self, fact: &CompletionFact) -> Result<bool, StorageError> {
        let mut guard = self.completions.lock().map_err(poisoned)?;
        let key = (fact.student_id, fact.topic_id);
        if guard.contains_key(&key) {
            return Ok(false);
        }
        guard.insert(key, fact.clone());
        Ok(true)
    }

    async fn completed_topics(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<HashSet<TopicId>, StorageError> {
        let guard = self.completions.lock().map_err(poisoned)?;
        Ok(guard
            .values()
            .filter(|f| f.student_id == student && f.course_id == course)
            .map(|f| f.topic_id)
            .collect())
    }

    async fn toggle_bookmark(
        &self,
        student: StudentId,
        topic: TopicId,
    ) -> Result<bool, StorageError> {
        let mut guard = self.bookmarks.lock().map_err(poisoned)?;
        let active = guard.entry((student, topic)).or_insert(false);
        *active = !*active;
        Ok(*active)
    }

    async fn bookmarked_topics(&self, student: StudentId) -> Result<HashSet<TopicId>, StorageError> {
        let guard = self.bookmarks.lock().map_err(poisoned)?;
        Ok(guard
            .iter()
            .filter(|((s, _), active)| *s == student && **active)
            .map(|((_, topic), _)| *topic)
            .collect())
    }

    async fn record_quiz_pass(&self, fact: &QuizPassFact) -> Result<bool, StorageError> {
        let mut guard = self.quiz_passes.lock().map_err(poisoned)?;
        let key = (fact.student_id, fact.quiz_id);
        if guard.contains_key(&key) {
            return Ok(false);
        }
        guard.insert(key, fact.clone());
        Ok(true)
    }

    async fn passed_quizzes(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<HashSet<QuizId>, StorageError> {
        let guard = self.quiz_passes.lock().map_err(poisoned)?;
        Ok(guard
            .values()
            .filter(|f| f.student_id == student && f.course_id == course)
            .map(|f| f.quiz_id)
            .collect())
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn start_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
        max_attempts: MaxAttempts,
        at: DateTime<Utc>,
    ) -> Result<AttemptAllocation, StorageError> {
        let mut guard = self.attempts.lock().map_err(poisoned)?;
        let attempts = guard.entry((student, quiz)).or_default();
        let existing = u32::try_from(attempts.len())
            .map_err(|_| StorageError::Serialization("attempt count overflow".into()))?;
        if !max_attempts.allows(existing) {
            return Ok(AttemptAllocation::LimitReached { existing });
        }

        for open in attempts
            .iter_mut()
            .filter(|a| a.status == AttemptStatus::InProgress)
        {
            open.status = AttemptStatus::Abandoned;
        }
        let next = attempts.last().map_or(1, |a| a.attempt_number + 1);
        let attempt = QuizAttempt::started(student, quiz, next, at);
        attempts.push(attempt.clone());
        Ok(AttemptAllocation::Started(attempt))
    }

    async fn in_progress_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
    ) -> Result<Option<QuizAttempt>, StorageError> {
        let guard = self.attempts.lock().map_err(poisoned)?;
        Ok(guard.get(&(student, quiz)).and_then(|list| {
            list.iter()
                .rev()
                .find(|a| a.status == AttemptStatus::InProgress)
                .cloned()
        }))
    }

    async fn record_graded(&self, attempt: &QuizAttempt) -> Result<(), StorageError> {
        let mut guard = self.attempts.lock().map_err(poisoned)?;
        let stored = guard
            .get_mut(&(attempt.student_id, attempt.quiz_id))
            .and_then(|list| {
                list.iter_mut()
                    .find(|a| a.attempt_number == attempt.attempt_number)
            })
            .ok_or(StorageError::NotFound)?;
        if stored.status != AttemptStatus::InProgress {
            return Err(StorageError::Conflict);
        }
        *stored = attempt.clone();
        Ok(())
    }

    async fn list_attempts(
        &self,
        student: StudentId,
        quiz: QuizId,
    ) -> Result<Vec<QuizAttempt>, StorageError> {
        let guard = self.attempts.lock().map_err(poisoned)?;
        Ok(guard.get(&(student, quiz)).cloned().unwrap_or_default())
    }

    async fn get_attempt(
        &self,
        student: StudentId,
        quiz: QuizId,
        attempt_number: u32,
    ) -> Result<QuizAttempt, StorageError> {
        let guard = self.attempts.lock().map_err(poisoned)?;
        guard
            .get(&(student, quiz))
            .and_then(|list| list.iter().find(|a| a.attempt_number == attempt_number))
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub catalog: Arc<dyn CatalogRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let catalog: Arc<dyn CatalogRepository> = Arc::new(repo.clone());
        let enrollments: Arc<dyn EnrollmentRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptRepository> = Arc::new(repo);
        Self {
            catalog,
            enrollments,
            progress,
            attempts,
        }
    }
}
