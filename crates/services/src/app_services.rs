use std::sync::Arc;

use storage::repository::{CatalogRepository, Storage};

use crate::Clock;
use crate::config::ServicesConfig;
use crate::error::LearningServicesError;
use crate::events::{EventSink, TracingEventSink};
use crate::gate::EnrollmentGate;
use crate::progress::ProgressService;
use crate::quiz::QuizAttemptService;

/// Assembles the gate, progress and quiz services over one storage backend.
#[derive(Clone)]
pub struct LearningServices {
    catalog: Arc<dyn CatalogRepository>,
    gate: Arc<EnrollmentGate>,
    progress: Arc<ProgressService>,
    quizzes: Arc<QuizAttemptService>,
}

impl LearningServices {
    /// Wire services over existing storage, logging events through `tracing`.
    #[must_use]
    pub fn from_storage(storage: &Storage, config: &ServicesConfig, clock: Clock) -> Self {
        Self::from_storage_with_events(storage, config, clock, Arc::new(TracingEventSink))
    }

    #[must_use]
    pub fn from_storage_with_events(
        storage: &Storage,
        config: &ServicesConfig,
        clock: Clock,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let gate = EnrollmentGate::new(
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.progress),
        )
        .with_clock(clock)
        .with_preview_policy(config.preview_policy());

        let progress = Arc::new(
            ProgressService::new(
                clock,
                gate.clone(),
                Arc::clone(&storage.catalog),
                Arc::clone(&storage.enrollments),
                Arc::clone(&storage.progress),
            )
            .with_events(events),
        );

        let quizzes = Arc::new(
            QuizAttemptService::new(
                clock,
                gate.clone(),
                Arc::clone(&storage.catalog),
                Arc::clone(&storage.attempts),
            )
            .with_reveal_policy(config.reveal)
            .with_listener(progress.clone()),
        );

        Self {
            catalog: Arc::clone(&storage.catalog),
            gate: Arc::new(gate),
            progress,
            quizzes,
        }
    }

    /// Build services backed by in-memory storage.
    #[must_use]
    pub fn in_memory(config: &ServicesConfig, clock: Clock) -> Self {
        Self::from_storage(&Storage::in_memory(), config, clock)
    }

    /// Build services backed by `SQLite` storage at `config.db_url`.
    ///
    /// # Errors
    ///
    /// Returns `LearningServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(
        config: &ServicesConfig,
        clock: Clock,
    ) -> Result<Self, LearningServicesError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        Ok(Self::from_storage(&storage, config, clock))
    }

    #[must_use]
    pub fn gate(&self) -> Arc<EnrollmentGate> {
        Arc::clone(&self.gate)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn quizzes(&self) -> Arc<QuizAttemptService> {
        Arc::clone(&self.quizzes)
    }

    /// Read access to the content catalog.
    #[must_use]
    pub fn catalog(&self) -> Arc<dyn CatalogRepository> {
        Arc::clone(&self.catalog)
    }
}
