use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use exam_core::model::{StudentId, SubmissionReceipt, TestId, TestSummary};
use exam_core::session::{SessionConfig, SessionState, TimingSelection};
use storage::repository::Storage;

use crate::Clock;
use crate::config::EngineConfig;
use crate::controller::SessionController;
use crate::error::SessionError;
use crate::persistence::SnapshotWriter;
use crate::submission::{HttpSubmissionSink, RetryPolicy, SubmissionSink};
use crate::test_source::{HttpTestSource, TestSource};

/// How a session should be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub timing: TimingSelection,
    /// Continue from a stored draft when one exists. When false, any draft is
    /// discarded and the session starts over.
    pub resume: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            timing: TimingSelection::Auto,
            resume: true,
        }
    }
}

impl OpenOptions {
    #[must_use]
    pub fn with_timing(mut self, timing: TimingSelection) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }
}

/// Opens exam sessions: resolves the test, restores drafts, refuses
/// sessions that were already graded, and wires the controller to storage
/// and the submission backend.
#[derive(Clone)]
pub struct ExamSessionService {
    clock: Clock,
    tests: Arc<dyn TestSource>,
    storage: Storage,
    sink: Arc<dyn SubmissionSink>,
    retry: RetryPolicy,
    save_debounce: Duration,
    tick_interval: Duration,
    allow_edit_after_timeout: bool,
}

impl ExamSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        tests: Arc<dyn TestSource>,
        storage: Storage,
        sink: Arc<dyn SubmissionSink>,
    ) -> Self {
        Self {
            clock,
            tests,
            storage,
            sink,
            retry: RetryPolicy::default(),
            save_debounce: Duration::from_secs(2),
            tick_interval: Duration::from_secs(1),
            allow_edit_after_timeout: false,
        }
    }

    /// Build the service with HTTP adapters and `SQLite` drafts when
    /// `config.db_url` is set, in-memory drafts otherwise.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Sqlite` if the database cannot be opened.
    pub async fn from_config(config: &EngineConfig, clock: Clock) -> Result<Self, SessionError> {
        let storage = match &config.db_url {
            Some(url) => Storage::sqlite(url).await?,
            None => Storage::in_memory(),
        };
        let tests = Arc::new(HttpTestSource::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
        ));
        let sink = Arc::new(HttpSubmissionSink::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
        ));

        Ok(Self::new(clock, tests, storage, sink)
            .with_retry_policy(config.retry)
            .with_save_debounce(config.save_debounce)
            .with_tick_interval(config.tick_interval)
            .with_edit_after_timeout(config.allow_edit_after_timeout))
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_save_debounce(mut self, debounce: Duration) -> Self {
        self.save_debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_edit_after_timeout(mut self, allow: bool) -> Self {
        self.allow_edit_after_timeout = allow;
        self
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Tests available to the student.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Load` when the catalogue cannot be fetched.
    pub async fn list_tests(&self) -> Result<Vec<TestSummary>, SessionError> {
        Ok(self.tests.list_tests().await?)
    }

    /// The stored grading result, if this student already submitted the test.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the receipt store cannot be read.
    pub async fn receipt(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<Option<SubmissionReceipt>, SessionError> {
        Ok(self.storage.receipts.get_receipt(test_id, student_id).await?)
    }

    /// Open a session for `student_id` on `test_id`.
    ///
    /// A stored draft is resumed with the time spent away charged in full,
    /// without fetching the test again. Otherwise the test is loaded and a new
    /// session is built in `not_started`.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadySubmitted` if a receipt exists for the pair.
    /// - `SessionError::Load` if the test cannot be fetched or is invalid.
    /// - `SessionError::Timing` if the requested timing mode is not possible.
    ///
    /// Storage failures are not errors: the controller reports itself as
    /// degraded and keeps the session in memory.
    #[instrument(skip(self, options), fields(test_id = %test_id, student_id = %student_id))]
    pub async fn open(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
        options: OpenOptions,
    ) -> Result<SessionController, SessionError> {
        let mut writer = SnapshotWriter::new(Arc::clone(&self.storage.snapshots), self.save_debounce);

        match self.storage.receipts.get_receipt(test_id, student_id).await {
            Ok(Some(_)) => {
                return Err(SessionError::AlreadySubmitted {
                    test_id: test_id.clone(),
                    student_id: student_id.clone(),
                });
            }
            Ok(None) => {}
            Err(e) => {
                writer.mark_degraded();
                tracing::warn!(error = %e, "receipt lookup failed; opening anyway");
            }
        }

        let draft = if options.resume {
            match self.storage.snapshots.load_snapshot(test_id, student_id).await {
                Ok(draft) => draft,
                Err(e) => {
                    writer.mark_degraded();
                    tracing::warn!(error = %e, "session draft unreadable; starting fresh");
                    None
                }
            }
        } else {
            if let Err(e) = self.storage.snapshots.delete_snapshot(test_id, student_id).await {
                writer.mark_degraded();
                tracing::warn!(error = %e, "failed to discard session draft");
            }
            None
        };

        let now = self.clock.now();
        let (state, resumed) = match draft {
            Some(snapshot) => {
                tracing::info!(
                    sequence = snapshot.sequence,
                    status = %snapshot.state.status(),
                    "resuming session draft"
                );
                (snapshot.into_state(now), true)
            }
            None => {
                let test = self.tests.load_test(test_id).await?;
                let timing = options.timing.resolve(&test)?;
                let config = SessionConfig::new(timing)
                    .with_edit_after_timeout(self.allow_edit_after_timeout);
                let state = SessionState::new(&test, student_id.clone(), config)?;
                tracing::info!(questions = state.questions().len(), ?timing, "session opened");
                (state, false)
            }
        };

        Ok(SessionController::new(
            state,
            self.clock,
            writer,
            Arc::clone(&self.sink),
            Arc::clone(&self.storage.receipts),
        )
        .with_retry_policy(self.retry)
        .with_tick_interval(self.tick_interval)
        .with_resumed(resumed))
    }
}
