use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::grading::{
    CorrectAnswer, RevealPolicy, ShortAnswerGrader, UngradedShortAnswers, correct_answers,
    grade_submission,
};
use course_core::model::{
    Answer, AttemptStatus, CourseId, Difficulty, MaxAttempts, Quiz, QuizAttempt, QuizId,
    QuizView, StudentId, validate_answers,
};
use serde::Serialize;
use storage::repository::{AttemptAllocation, AttemptRepository, CatalogRepository, StorageError};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::error::QuizAttemptError;
use crate::gate::EnrollmentGate;

/// Concurrent starts can lose the slot to another writer; re-read and retry this often.
const START_RETRIES: u32 = 3;

/// Notified after a passing attempt has been persisted.
#[async_trait]
pub trait QuizOutcomeListener: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if recording the pass fails.
    async fn quiz_passed(&self, attempt: &QuizAttempt, course: CourseId)
    -> Result<(), StorageError>;
}

/// Returned by [`QuizAttemptService::start_attempt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedAttempt {
    pub attempt_number: u32,
    /// `None` when the quiz has no attempt ceiling.
    pub attempts_remaining: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub quiz: QuizView,
}

/// A stored attempt, with correct answers when the reveal policy allows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptResult {
    pub attempt: QuizAttempt,
    pub revealed: bool,
    pub correct_answers: Vec<CorrectAnswer>,
}

/// Per-student overview of one published quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizSummary {
    pub quiz_id: QuizId,
    pub title: String,
    pub difficulty: Difficulty,
    pub passing_score: u8,
    pub max_attempts: MaxAttempts,
    pub question_count: u32,
    pub total_points: u32,
    pub attempts_used: u32,
    pub best_score: Option<u8>,
    pub passed: bool,
    pub can_start: bool,
}

/// Owns the attempt lifecycle: start, submit, grade, persist.
#[derive(Clone)]
pub struct QuizAttemptService {
    clock: Clock,
    gate: EnrollmentGate,
    catalog: Arc<dyn CatalogRepository>,
    attempts: Arc<dyn AttemptRepository>,
    grader: Arc<dyn ShortAnswerGrader>,
    reveal: RevealPolicy,
    listener: Option<Arc<dyn QuizOutcomeListener>>,
}

impl QuizAttemptService {
    #[must_use]
    pub fn new(
        clock: Clock,
        gate: EnrollmentGate,
        catalog: Arc<dyn CatalogRepository>,
        attempts: Arc<dyn AttemptRepository>,
    ) -> Self {
        Self {
            clock,
            gate,
            catalog,
            attempts,
            grader: Arc::new(UngradedShortAnswers),
            reveal: RevealPolicy::default(),
            listener: None,
        }
    }

    #[must_use]
    pub fn with_grader(mut self, grader: Arc<dyn ShortAnswerGrader>) -> Self {
        self.grader = grader;
        self
    }

    #[must_use]
    pub fn with_reveal_policy(mut self, reveal: RevealPolicy) -> Self {
        self.reveal = reveal;
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn QuizOutcomeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Absent and unpublished quizzes look the same to students.
    async fn load_quiz(&self, quiz: QuizId) -> Result<Quiz, QuizAttemptError> {
        match self.catalog.get_quiz(quiz).await {
            Ok(q) if q.is_published() => Ok(q),
            Ok(_) | Err(StorageError::NotFound) => Err(QuizAttemptError::QuizNotFound(quiz)),
            Err(e) => Err(e.into()),
        }
    }

    fn result_for(&self, quiz: &Quiz, attempt: QuizAttempt) -> AttemptResult {
        let revealed =
            attempt.status == AttemptStatus::Graded && self.reveal.reveals(attempt.passed);
        AttemptResult {
            correct_answers: if revealed {
                correct_answers(quiz)
            } else {
                Vec::new()
            },
            revealed,
            attempt,
        }
    }

    /// Allocate the next attempt number and return the question set without
    /// correct answers or explanations.
    ///
    /// An attempt still in progress is abandoned by the new one and still counts
    /// toward the ceiling.
    ///
    /// # Errors
    ///
    /// Returns `QuizAttemptError::QuizNotFound` if the quiz is absent or
    /// unpublished, `QuizAttemptError::MaxAttemptsExceeded` once the ceiling is
    /// reached, or a gate error for the owning course.
    pub async fn start_attempt(
        &self,
        student: StudentId,
        quiz_id: QuizId,
    ) -> Result<StartedAttempt, QuizAttemptError> {
        let quiz = self.load_quiz(quiz_id).await?;
        let course = quiz.course_id();
        self.gate.authorize_mutation(student, course).await?;

        let max = quiz.max_attempts();
        let now = self.clock.now();
        let mut tries = 0;
        let attempt = loop {
            tries += 1;
            match self.attempts.start_attempt(student, quiz_id, max, now).await {
                Ok(AttemptAllocation::Started(attempt)) => break attempt,
                Ok(AttemptAllocation::LimitReached { existing }) => {
                    debug!(%student, quiz = %quiz_id, existing, "attempt ceiling reached");
                    return Err(QuizAttemptError::MaxAttemptsExceeded {
                        quiz: quiz_id,
                        max: max.as_limit().unwrap_or(existing),
                    });
                }
                Err(StorageError::Conflict) if tries < START_RETRIES => {
                    warn!(%student, quiz = %quiz_id, tries, "attempt slot taken; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.gate.touch(student, course, now).await?;
        info!(
            %student,
            quiz = %quiz_id,
            attempt = attempt.attempt_number,
            "quiz attempt started"
        );

        Ok(StartedAttempt {
            attempt_number: attempt.attempt_number,
            attempts_remaining: max.remaining(attempt.attempt_number),
            started_at: attempt.started_at,
            quiz: quiz.student_view(),
        })
    }

    /// Grade the in-progress attempt and persist it as final.
    ///
    /// Answers naming questions outside the quiz are ignored. Correct answers are
    /// attached when the attempt passed or the reveal policy always shows them.
    ///
    /// # Errors
    ///
    /// Returns `QuizAttemptError::AttemptNotFound` if nothing is in progress,
    /// `QuizAttemptError::Validation` for a malformed payload, or
    /// `QuizAttemptError::QuizNotFound`.
    pub async fn submit_attempt(
        &self,
        student: StudentId,
        quiz_id: QuizId,
        answers: &[Answer],
        time_spent_secs: u32,
    ) -> Result<AttemptResult, QuizAttemptError> {
        let quiz = self.load_quiz(quiz_id).await?;
        let course = quiz.course_id();
        self.gate.require_enrollment(student, course).await?;
        validate_answers(answers)?;

        let mut attempt = self
            .attempts
            .in_progress_attempt(student, quiz_id)
            .await?
            .ok_or(QuizAttemptError::AttemptNotFound(quiz_id))?;

        let dropped = answers
            .iter()
            .filter(|a| quiz.question(a.question_id).is_none())
            .count();
        if dropped > 0 {
            debug!(%student, quiz = %quiz_id, dropped, "ignoring answers to unknown questions");
        }

        let now = self.clock.now();
        let outcome = grade_submission(&quiz, answers, self.grader.as_ref());
        attempt
            .apply_grade(outcome, time_spent_secs, now)
            .map_err(|_| QuizAttemptError::AttemptNotFound(quiz_id))?;

        match self.attempts.record_graded(&attempt).await {
            Ok(()) => {}
            // Lost a race with a concurrent submit or a newer start.
            Err(StorageError::Conflict | StorageError::NotFound) => {
                return Err(QuizAttemptError::AttemptNotFound(quiz_id));
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            %student,
            quiz = %quiz_id,
            attempt = attempt.attempt_number,
            score = attempt.score,
            passed = attempt.passed,
            "quiz attempt graded"
        );

        // The graded attempt is committed; failures past this point are logged only.
        if attempt.passed {
            if let Some(listener) = &self.listener {
                if let Err(e) = listener.quiz_passed(&attempt, course).await {
                    warn!(
                        %student,
                        quiz = %quiz_id,
                        attempt = attempt.attempt_number,
                        error = %e,
                        "failed to record quiz pass"
                    );
                }
            }
        }
        if let Err(e) = self.gate.touch(student, course, now).await {
            warn!(%student, %course, error = %e, "failed to update last access");
        }

        Ok(self.result_for(&quiz, attempt))
    }

    /// All attempts on the quiz, lowest number first.
    ///
    /// # Errors
    ///
    /// Returns `QuizAttemptError::QuizNotFound` or `QuizAttemptError::NotEnrolled`.
    pub async fn list_attempts(
        &self,
        student: StudentId,
        quiz_id: QuizId,
    ) -> Result<Vec<QuizAttempt>, QuizAttemptError> {
        let quiz = self.load_quiz(quiz_id).await?;
        self.gate.require_enrollment(student, quiz.course_id()).await?;
        Ok(self.attempts.list_attempts(student, quiz_id).await?)
    }

    /// One past attempt, under the same reveal rules as a fresh submit.
    ///
    /// # Errors
    ///
    /// Returns `QuizAttemptError::AttemptNotFound` for an unknown number.
    pub async fn attempt_result(
        &self,
        student: StudentId,
        quiz_id: QuizId,
        attempt_number: u32,
    ) -> Result<AttemptResult, QuizAttemptError> {
        let quiz = self.load_quiz(quiz_id).await?;
        self.gate.require_enrollment(student, quiz.course_id()).await?;
        let attempt = match self
            .attempts
            .get_attempt(student, quiz_id, attempt_number)
            .await
        {
            Ok(a) => a,
            Err(StorageError::NotFound) => return Err(QuizAttemptError::AttemptNotFound(quiz_id)),
            Err(e) => return Err(e.into()),
        };
        Ok(self.result_for(&quiz, attempt))
    }

    /// Published quizzes of a course with the student's standing on each.
    ///
    /// # Errors
    ///
    /// Returns `QuizAttemptError::NotEnrolled` or a storage error.
    pub async fn quizzes_for_course(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Vec<QuizSummary>, QuizAttemptError> {
        self.gate.require_enrollment(student, course).await?;
        let quizzes = self.catalog.quizzes_for_course(course).await?;

        let mut out = Vec::with_capacity(quizzes.len());
        for quiz in quizzes.into_iter().filter(Quiz::is_published) {
            let attempts = self.attempts.list_attempts(student, quiz.id()).await?;
            let used = u32::try_from(attempts.len()).unwrap_or(u32::MAX);
            let graded = attempts
                .iter()
                .filter(|a| a.status == AttemptStatus::Graded);
            out.push(QuizSummary {
                quiz_id: quiz.id(),
                title: quiz.title().to_owned(),
                difficulty: quiz.difficulty(),
                passing_score: quiz.passing_score(),
                max_attempts: quiz.max_attempts(),
                question_count: u32::try_from(quiz.questions().len()).unwrap_or(u32::MAX),
                total_points: quiz.total_points(),
                attempts_used: used,
                best_score: graded.clone().map(|a| a.score).max(),
                passed: graded.clone().any(|a| a.passed),
                can_start: quiz.max_attempts().allows(used),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressService;
    use course_core::grading::ExactMatchGrader;
    use course_core::model::{
        AnswerError, Chapter, ChapterId, Course, Question, QuestionId, QuestionOption,
        Subchapter, SubchapterId, Topic, TopicId,
    };
    use course_core::time::{fixed_clock, fixed_now};
    use storage::repository::{ProgressRepository, Storage};

    fn choice(id: u64, correct: usize) -> Question {
        let options = (0..3)
            .map(|i| QuestionOption::new(format!("option {i}"), i == correct))
            .collect();
        Question::multiple_choice(QuestionId::new(id), format!("Question {id}"), options, 5)
            .unwrap()
            .with_explanation(format!("Option {correct} is right"))
    }

    fn scored_quiz(id: u64, max: u32) -> Quiz {
        let mut quiz = Quiz::new(QuizId::new(id), CourseId::new(1), "Scoring", vec![
            choice(1, 0),
            choice(2, 1),
        ])
        .unwrap()
        .with_passing_score(60)
        .unwrap()
        .with_max_attempts(MaxAttempts::limited(max).unwrap());
        quiz.publish(fixed_now());
        quiz
    }

    struct Fixture {
        storage: Storage,
        gate: EnrollmentGate,
        service: QuizAttemptService,
        student: StudentId,
    }

    async fn fixture() -> Fixture {
        let storage = Storage::in_memory();
        let topic = Topic::new(TopicId::new(1), "Intro", 1, 5).unwrap();
        let sub = Subchapter::new(SubchapterId::new(1), "Basics", 1, vec![topic]).unwrap();
        let chapter = Chapter::new(ChapterId::new(1), "One", 1, vec![sub]).unwrap();
        let course = Course::new(CourseId::new(1), "Course", vec![chapter]).unwrap();
        storage.catalog.upsert_course(&course).await.unwrap();
        storage.catalog.upsert_quiz(&scored_quiz(10, 2)).await.unwrap();

        let gate = EnrollmentGate::new(
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.progress),
        )
        .with_clock(fixed_clock());
        let service = QuizAttemptService::new(
            fixed_clock(),
            gate.clone(),
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.attempts),
        );
        let student = StudentId::random();
        gate.ensure_enrolled(student, CourseId::new(1)).await.unwrap();
        Fixture {
            storage,
            gate,
            service,
            student,
        }
    }

    fn half_right() -> Vec<Answer> {
        vec![
            Answer::choice(QuestionId::new(1), 0),
            Answer::choice(QuestionId::new(2), 2),
        ]
    }

    fn all_right() -> Vec<Answer> {
        vec![
            Answer::choice(QuestionId::new(1), 0),
            Answer::choice(QuestionId::new(2), 1),
        ]
    }

    #[tokio::test]
    async fn scoring_and_pass_threshold() {
        let fx = fixture().await;
        let quiz = QuizId::new(10);

        let started = fx.service.start_attempt(fx.student, quiz).await.unwrap();
        assert_eq!(started.attempt_number, 1);
        assert_eq!(started.attempts_remaining, Some(1));
        assert_eq!(started.quiz.questions.len(), 2);

        let result = fx
            .service
            .submit_attempt(fx.student, quiz, &half_right(), 40)
            .await
            .unwrap();
        assert_eq!(result.attempt.points_earned, 5);
        assert_eq!(result.attempt.total_points, 10);
        assert_eq!(result.attempt.score, 50);
        assert!(!result.attempt.passed);
        assert!(!result.revealed);
        assert!(result.correct_answers.is_empty());

        fx.service.start_attempt(fx.student, quiz).await.unwrap();
        let result = fx
            .service
            .submit_attempt(fx.student, quiz, &all_right(), 40)
            .await
            .unwrap();
        assert_eq!(result.attempt.score, 100);
        assert!(result.attempt.passed);
        assert!(result.revealed);
        assert_eq!(result.correct_answers.len(), 2);
        assert_eq!(
            result.correct_answers[0].explanation.as_deref(),
            Some("Option 0 is right")
        );
    }

    #[tokio::test]
    async fn third_start_exceeds_the_ceiling() {
        let fx = fixture().await;
        let quiz = QuizId::new(10);
        for _ in 0..2 {
            fx.service.start_attempt(fx.student, quiz).await.unwrap();
            fx.service
                .submit_attempt(fx.student, quiz, &half_right(), 1)
                .await
                .unwrap();
        }
        let err = fx.service.start_attempt(fx.student, quiz).await.unwrap_err();
        assert!(matches!(
            err,
            QuizAttemptError::MaxAttemptsExceeded { max: 2, .. }
        ));
        assert!(!err.kind().is_retryable());
    }

    #[tokio::test]
    async fn submit_without_start_is_rejected() {
        let fx = fixture().await;
        let err = fx
            .service
            .submit_attempt(fx.student, QuizId::new(10), &all_right(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, QuizAttemptError::AttemptNotFound(_)));
    }

    #[tokio::test]
    async fn graded_attempt_cannot_be_submitted_twice() {
        let fx = fixture().await;
        let quiz = QuizId::new(10);
        fx.service.start_attempt(fx.student, quiz).await.unwrap();
        fx.service
            .submit_attempt(fx.student, quiz, &half_right(), 1)
            .await
            .unwrap();
        let err = fx
            .service
            .submit_attempt(fx.student, quiz, &all_right(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, QuizAttemptError::AttemptNotFound(_)));
        let attempts = fx.service.list_attempts(fx.student, quiz).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].score, 50);
    }

    #[tokio::test]
    async fn unpublished_quiz_is_not_found() {
        let fx = fixture().await;
        let mut hidden = scored_quiz(11, 3);
        hidden.unpublish();
        fx.storage.catalog.upsert_quiz(&hidden).await.unwrap();
        for id in [11, 404] {
            let err = fx
                .service
                .start_attempt(fx.student, QuizId::new(id))
                .await
                .unwrap_err();
            assert!(matches!(err, QuizAttemptError::QuizNotFound(_)));
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_a_validation_error() {
        let fx = fixture().await;
        let quiz = QuizId::new(10);
        fx.service.start_attempt(fx.student, quiz).await.unwrap();
        let dup = vec![
            Answer::choice(QuestionId::new(1), 0),
            Answer::choice(QuestionId::new(1), 1),
        ];
        let err = fx
            .service
            .submit_attempt(fx.student, quiz, &dup, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QuizAttemptError::Validation(AnswerError::Duplicate(_))
        ));
        // the attempt is still open
        assert!(
            fx.storage
                .attempts
                .in_progress_attempt(fx.student, quiz)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn unknown_questions_are_dropped() {
        let fx = fixture().await;
        let quiz = QuizId::new(10);
        fx.service.start_attempt(fx.student, quiz).await.unwrap();
        let mut answers = all_right();
        answers.push(Answer::choice(QuestionId::new(99), 0));
        let result = fx
            .service
            .submit_attempt(fx.student, quiz, &answers, 1)
            .await
            .unwrap();
        assert_eq!(result.attempt.answers.len(), 2);
        assert_eq!(result.attempt.score, 100);
    }

    #[tokio::test]
    async fn reveal_policy_and_result_retrieval() {
        let fx = fixture().await;
        let quiz = QuizId::new(10);
        let service = fx
            .service
            .clone()
            .with_reveal_policy(RevealPolicy {
                show_correct_answers: true,
            });
        service.start_attempt(fx.student, quiz).await.unwrap();
        let result = service
            .submit_attempt(fx.student, quiz, &half_right(), 1)
            .await
            .unwrap();
        assert!(result.revealed);

        let fetched = fx.service.attempt_result(fx.student, quiz, 1).await.unwrap();
        assert!(!fetched.revealed);
        assert_eq!(fetched.attempt, result.attempt);

        let err = fx
            .service
            .attempt_result(fx.student, quiz, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, QuizAttemptError::AttemptNotFound(_)));
    }

    #[tokio::test]
    async fn short_answers_use_the_injected_grader() {
        let fx = fixture().await;
        let mut quiz = Quiz::new(QuizId::new(12), CourseId::new(1), "Words", vec![
            Question::short_answer(QuestionId::new(1), "Trait run on scope exit?", 4)
                .unwrap()
                .with_model_answer("Drop"),
        ])
        .unwrap();
        quiz.publish(fixed_now());
        fx.storage.catalog.upsert_quiz(&quiz).await.unwrap();
        let answers = [Answer::text(QuestionId::new(1), " drop ")];

        fx.service.start_attempt(fx.student, quiz.id()).await.unwrap();
        let ungraded = fx
            .service
            .submit_attempt(fx.student, quiz.id(), &answers, 1)
            .await
            .unwrap();
        assert_eq!(ungraded.attempt.points_earned, 0);

        let exact = fx.service.clone().with_grader(Arc::new(ExactMatchGrader));
        exact.start_attempt(fx.student, quiz.id()).await.unwrap();
        let graded = exact
            .submit_attempt(fx.student, quiz.id(), &answers, 1)
            .await
            .unwrap();
        assert_eq!(graded.attempt.points_earned, 4);
        assert!(graded.attempt.passed);
    }

    #[tokio::test]
    async fn passing_notifies_progress() {
        let fx = fixture().await;
        let progress = ProgressService::new(
            fixed_clock(),
            fx.gate.clone(),
            Arc::clone(&fx.storage.catalog),
            Arc::clone(&fx.storage.enrollments),
            Arc::clone(&fx.storage.progress),
        );
        let service = fx.service.clone().with_listener(Arc::new(progress));
        let quiz = QuizId::new(10);

        service.start_attempt(fx.student, quiz).await.unwrap();
        service
            .submit_attempt(fx.student, quiz, &half_right(), 1)
            .await
            .unwrap();
        let passed = fx
            .storage
            .progress
            .passed_quizzes(fx.student, CourseId::new(1))
            .await
            .unwrap();
        assert!(passed.is_empty());

        service.start_attempt(fx.student, quiz).await.unwrap();
        service
            .submit_attempt(fx.student, quiz, &all_right(), 1)
            .await
            .unwrap();
        let passed = fx
            .storage
            .progress
            .passed_quizzes(fx.student, CourseId::new(1))
            .await
            .unwrap();
        assert!(passed.contains(&quiz));
    }

    struct FailingListener;

    #[async_trait]
    impl QuizOutcomeListener for FailingListener {
        async fn quiz_passed(
            &self,
            _attempt: &QuizAttempt,
            _course: CourseId,
        ) -> Result<(), StorageError> {
            Err(StorageError::Connection("listener offline".into()))
        }
    }

    #[tokio::test]
    async fn listener_failure_does_not_fail_a_stored_submit() {
        let fx = fixture().await;
        let service = fx.service.clone().with_listener(Arc::new(FailingListener));
        let quiz = QuizId::new(10);

        service.start_attempt(fx.student, quiz).await.unwrap();
        let result = service
            .submit_attempt(fx.student, quiz, &all_right(), 1)
            .await
            .unwrap();
        assert!(result.attempt.passed);

        let stored = service.attempt_result(fx.student, quiz, 1).await.unwrap();
        assert_eq!(stored.attempt.status, AttemptStatus::Graded);
        assert!(stored.attempt.passed);
    }

    #[tokio::test]
    async fn course_listing_summarizes_attempts() {
        let fx = fixture().await;
        let quiz = QuizId::new(10);
        fx.service.start_attempt(fx.student, quiz).await.unwrap();
        fx.service
            .submit_attempt(fx.student, quiz, &half_right(), 1)
            .await
            .unwrap();

        let listed = fx
            .service
            .quizzes_for_course(fx.student, CourseId::new(1))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        let summary = &listed[0];
        assert_eq!(summary.attempts_used, 1);
        assert_eq!(summary.best_score, Some(50));
        assert!(!summary.passed);
        assert!(summary.can_start);
        assert_eq!(summary.question_count, 2);
        assert_eq!(summary.total_points, 10);
    }

    #[tokio::test]
    async fn starting_requires_enrollment() {
        let fx = fixture().await;
        let err = fx
            .service
            .start_attempt(StudentId::random(), QuizId::new(10))
            .await
            .unwrap_err();
        assert!(matches!(err, QuizAttemptError::NotEnrolled(_)));
    }
}
