use std::sync::Arc;

use chrono::{DateTime, Utc};
use course_core::model::{
    CourseId, Enrollment, PaymentMethod, StudentId, Subscription, SubscriptionType,
};
use storage::repository::{
    CatalogRepository, EnrollmentRepository, ProgressRepository, StorageError,
};
use tracing::{debug, info};

use crate::Clock;
use crate::error::GateError;

//
// ─── PREVIEW POLICY ────────────────────────────────────────────────────────────
//

/// Decides how much of a course a student may use before paying.
pub trait PreviewPolicy: Send + Sync {
    fn allows_without_subscription(&self, completed_topics: u32) -> bool;
}

/// Every course is free to use.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedPreview;

impl PreviewPolicy for UnlimitedPreview {
    fn allows_without_subscription(&self, _completed_topics: u32) -> bool {
        true
    }
}

/// The first `topics` completions are free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicAllowance {
    pub topics: u32,
}

impl PreviewPolicy for TopicAllowance {
    fn allows_without_subscription(&self, completed_topics: u32) -> bool {
        completed_topics < self.topics
    }
}

//
// ─── GATE ──────────────────────────────────────────────────────────────────────
//

/// Authorization choke-point for every course-scoped operation.
#[derive(Clone)]
pub struct EnrollmentGate {
    clock: Clock,
    enrollments: Arc<dyn EnrollmentRepository>,
    catalog: Arc<dyn CatalogRepository>,
    progress: Arc<dyn ProgressRepository>,
    preview: Arc<dyn PreviewPolicy>,
}

impl EnrollmentGate {
    #[must_use]
    pub fn new(
        enrollments: Arc<dyn EnrollmentRepository>,
        catalog: Arc<dyn CatalogRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock: Clock::default(),
            enrollments,
            catalog,
            progress,
            preview: Arc::new(UnlimitedPreview),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_preview_policy(mut self, preview: Arc<dyn PreviewPolicy>) -> Self {
        self.preview = preview;
        self
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Enroll the student if needed and return the stored enrollment.
    /// Enrolling twice returns the original record.
    ///
    /// # Errors
    ///
    /// Returns `GateError::CourseNotFound` for an unknown course, or
    /// `GateError::Storage` on backend failure.
    pub async fn ensure_enrolled(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Enrollment, GateError> {
        match self.catalog.get_course(course).await {
            Ok(_) => {}
            Err(StorageError::NotFound) => return Err(GateError::CourseNotFound(course)),
            Err(e) => return Err(e.into()),
        }

        let now = self.clock.now();
        let (enrollment, created) = self
            .enrollments
            .ensure_enrollment(student, course, now)
            .await?;
        if created {
            info!(%student, %course, "student enrolled");
        } else {
            debug!(%student, %course, "already enrolled");
        }
        Ok(enrollment)
    }

    /// Look up an existing enrollment without creating one.
    ///
    /// # Errors
    ///
    /// Returns `GateError::NotEnrolled` if the student never enrolled.
    pub async fn require_enrollment(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Enrollment, GateError> {
        self.enrollments
            .get_enrollment(student, course)
            .await?
            .ok_or(GateError::NotEnrolled(course))
    }

    /// True once the free preview is used up and no active subscription exists.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Storage` on backend failure.
    pub async fn requires_subscription(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<bool, GateError> {
        let now = self.clock.now();
        let subscription = self.enrollments.get_subscription(student, course).await?;
        if subscription.is_some_and(|sub| sub.is_active(now)) {
            return Ok(false);
        }
        let completed = self.progress.completed_topics(student, course).await?;
        let completed = u32::try_from(completed.len()).unwrap_or(u32::MAX);
        Ok(!self.preview.allows_without_subscription(completed))
    }

    /// Precondition for every mutating operation: enrolled, and either inside the
    /// free preview or subscribed.
    ///
    /// # Errors
    ///
    /// Returns `GateError::NotEnrolled` or `GateError::SubscriptionRequired`.
    pub async fn authorize_mutation(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Enrollment, GateError> {
        let enrollment = self.require_enrollment(student, course).await?;
        if self.requires_subscription(student, course).await? {
            return Err(GateError::SubscriptionRequired(course));
        }
        Ok(enrollment)
    }

    /// Activate a subscription, enrolling the student first if needed.
    ///
    /// Repeating the call with the same type while it is still active returns the
    /// stored subscription unchanged.
    ///
    /// # Errors
    ///
    /// Returns `GateError::CourseNotFound` for an unknown course, or
    /// `GateError::Storage` on backend failure.
    pub async fn subscribe(
        &self,
        student: StudentId,
        course: CourseId,
        kind: SubscriptionType,
        payment_method: PaymentMethod,
        transaction_id: Option<String>,
    ) -> Result<Subscription, GateError> {
        self.ensure_enrolled(student, course).await?;
        let now = self.clock.now();

        let existing = self.enrollments.get_subscription(student, course).await?;
        if let Some(existing) = existing.filter(|s| s.kind == kind && s.is_active(now)) {
            debug!(%student, %course, kind = kind.as_str(), "subscription already active");
            return Ok(existing);
        }

        let subscription = Subscription {
            student_id: student,
            course_id: course,
            kind,
            payment_method,
            transaction_id,
            activated_at: now,
        };
        self.enrollments.upsert_subscription(&subscription).await?;
        info!(
            %student,
            %course,
            kind = kind.as_str(),
            payment = payment_method.as_str(),
            "subscription activated"
        );
        Ok(subscription)
    }

    /// Record activity on the course at `at`.
    ///
    /// # Errors
    ///
    /// Returns `GateError::NotEnrolled` if no enrollment exists.
    pub async fn touch(
        &self,
        student: StudentId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), GateError> {
        match self.enrollments.touch_enrollment(student, course, at).await {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound) => Err(GateError::NotEnrolled(course)),
            Err(e) => Err(e.into()),
        }
    }
}
