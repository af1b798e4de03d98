use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use exam_core::model::{StudentId, TestId};
use exam_core::session::{Change, SessionSnapshot, SessionState};
use storage::repository::{SaveOutcome, SessionSnapshotRepository};

/// Debounced, ordered writer for session drafts.
///
/// Critical changes (start, expiry, submission) are written at once; answer
/// selections and navigation are coalesced and written at most once per
/// debounce window. Storage failures never reach the caller: they are logged
/// and the writer reports itself as degraded, and the session continues in
/// memory.
pub struct SnapshotWriter {
    repo: Arc<dyn SessionSnapshotRepository>,
    debounce: Duration,
    last_write: Option<DateTime<Utc>>,
    pending: Option<SessionSnapshot>,
    degraded: bool,
}

impl SnapshotWriter {
    #[must_use]
    pub fn new(repo: Arc<dyn SessionSnapshotRepository>, debounce: Duration) -> Self {
        Self {
            repo,
            debounce,
            last_write: None,
            pending: None,
            degraded: false,
        }
    }

    /// Mark the writer degraded, e.g. after a failed draft load.
    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }

    /// True once any storage call failed. Resumption may then be incomplete.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.last_write.is_none_or(|last| {
            (now - last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.debounce)
        })
    }

    /// Record the state after an applied change.
    pub async fn record(&mut self, state: &SessionState, change: &Change, now: DateTime<Utc>) {
        let snapshot = SessionSnapshot::capture(state, now);
        if change.is_critical() || self.window_elapsed(now) {
            self.pending = None;
            self.write(snapshot, now).await;
        } else {
            self.pending = Some(snapshot);
        }
    }

    /// Write the coalesced snapshot if the debounce window has passed.
    pub async fn flush_if_due(&mut self, now: DateTime<Utc>) {
        if self.pending.is_some() && self.window_elapsed(now) {
            self.flush(now).await;
        }
    }

    /// Write the coalesced snapshot regardless of the debounce window.
    pub async fn flush(&mut self, now: DateTime<Utc>) {
        if let Some(snapshot) = self.pending.take() {
            self.write(snapshot, now).await;
        }
    }

    /// Drop the stored draft. Called only after a confirmed submission.
    pub async fn clear(&mut self, test_id: &TestId, student_id: &StudentId) {
        self.pending = None;
        if let Err(e) = self.repo.delete_snapshot(test_id, student_id).await {
            self.degraded = true;
            tracing::warn!(%test_id, %student_id, error = %e, "failed to delete session draft");
        }
    }

    async fn write(&mut self, snapshot: SessionSnapshot, now: DateTime<Utc>) {
        match self.repo.save_snapshot(&snapshot).await {
            Ok(SaveOutcome::Written) => {
                self.last_write = Some(now);
                tracing::debug!(
                    test_id = %snapshot.test_id(),
                    sequence = snapshot.sequence,
                    status = %snapshot.state.status(),
                    "session draft saved"
                );
            }
            Ok(SaveOutcome::Stale { stored_sequence }) => {
                self.last_write = Some(now);
                tracing::debug!(
                    test_id = %snapshot.test_id(),
                    sequence = snapshot.sequence,
                    stored_sequence,
                    "newer draft already stored"
                );
            }
            Err(e) => {
                if !self.degraded {
                    tracing::warn!(
                        test_id = %snapshot.test_id(),
                        student_id = %snapshot.student_id(),
                        error = %e,
                        "session draft not saved; continuing in memory"
                    );
                }
                self.degraded = true;
            }
        }
    }
}
