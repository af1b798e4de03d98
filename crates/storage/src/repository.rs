use async_trait::async_trait;
use exam_core::model::{StudentId, SubmissionReceipt, TestId};
use exam_core::session::SessionSnapshot;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result of a snapshot write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// A newer snapshot was already stored; this one was discarded.
    Stale { stored_sequence: u64 },
}

type SessionKey = (TestId, StudentId);

fn key(test_id: &TestId, student_id: &StudentId) -> SessionKey {
    (test_id.clone(), student_id.clone())
}

/// Draft storage for in-flight sessions, keyed by (test, student).
#[async_trait]
pub trait SessionSnapshotRepository: Send + Sync {
    /// Store a snapshot unless a newer one (higher `sequence`) is already stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<SaveOutcome, StorageError>;

    /// Fetch the latest snapshot for a session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn load_snapshot(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<Option<SessionSnapshot>, StorageError>;

    /// Remove the draft. Deleting a missing draft is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn delete_snapshot(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<(), StorageError>;
}

/// Confirmed submissions, kept after the draft is gone.
#[async_trait]
pub trait SubmissionReceiptRepository: Send + Sync {
    /// Store a receipt. The first receipt for a session wins; later ones are
    /// ignored and the stored receipt is returned.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn record_receipt(
        &self,
        receipt: &SubmissionReceipt,
    ) -> Result<SubmissionReceipt, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend or decoding failures.
    async fn get_receipt(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<Option<SubmissionReceipt>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    snapshots: Arc<Mutex<HashMap<SessionKey, SessionSnapshot>>>,
    receipts: Arc<Mutex<HashMap<SessionKey, SubmissionReceipt>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionSnapshotRepository for InMemoryRepository {
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<SaveOutcome, StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let k = key(snapshot.test_id(), snapshot.student_id());
        if let Some(stored) = guard.get(&k) {
            if stored.sequence > snapshot.sequence {
                return Ok(SaveOutcome::Stale {
                    stored_sequence: stored.sequence,
                });
            }
        }
        guard.insert(k, snapshot.clone());
        Ok(SaveOutcome::Written)
    }

    async fn load_snapshot(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<Option<SessionSnapshot>, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&key(test_id, student_id)).cloned())
    }

    async fn delete_snapshot(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&key(test_id, student_id));
        Ok(())
    }
}

#[async_trait]
impl SubmissionReceiptRepository for InMemoryRepository {
    async fn record_receipt(
        &self,
        receipt: &SubmissionReceipt,
    ) -> Result<SubmissionReceipt, StorageError> {
        let mut guard = self
            .receipts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let stored = guard
            .entry(key(&receipt.test_id, &receipt.student_id))
            .or_insert_with(|| receipt.clone());
        Ok(stored.clone())
    }

    async fn get_receipt(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<Option<SubmissionReceipt>, StorageError> {
        let guard = self
            .receipts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&key(test_id, student_id)).cloned())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub snapshots: Arc<dyn SessionSnapshotRepository>,
    pub receipts: Arc<dyn SubmissionReceiptRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let snapshots: Arc<dyn SessionSnapshotRepository> = Arc::new(repo.clone());
        let receipts: Arc<dyn SubmissionReceiptRepository> = Arc::new(repo);
        Self {
            snapshots,
            receipts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{QuestionDraft, SubmissionResult, TestDraft};
    use exam_core::session::{SessionConfig, SessionState, TimingMode};
    use exam_core::time::fixed_now;

    fn build_state() -> SessionState {
        let test = TestDraft::new("t1", "Test")
            .with_duration_minutes(10)
            .with_question(
                QuestionDraft::new("q1", "?")
                    .with_option("a", "A")
                    .with_option("b", "B"),
            )
            .validate()
            .unwrap();
        SessionState::new(
            &test,
            StudentId::new("s1"),
            SessionConfig::new(TimingMode::WholeTest { duration_secs: 600 }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stale_snapshot_does_not_overwrite_newer() {
        let repo = InMemoryRepository::new();
        let mut state = build_state();
        let older = SessionSnapshot::capture(&state, fixed_now());
        state.start(fixed_now());
        state.select_answer(
            &exam_core::model::QuestionId::new("q1"),
            &exam_core::model::AnswerId::new("a"),
            "A",
            fixed_now(),
        );
        let newer = SessionSnapshot::capture(&state, fixed_now());

        assert_eq!(repo.save_snapshot(&newer).await.unwrap(), SaveOutcome::Written);
        assert_eq!(
            repo.save_snapshot(&older).await.unwrap(),
            SaveOutcome::Stale { stored_sequence: 2 }
        );

        let loaded = repo
            .load_snapshot(&TestId::new("t1"), &StudentId::new("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.sequence, 2);
    }

    #[tokio::test]
    async fn delete_removes_draft() {
        let repo = InMemoryRepository::new();
        let state = build_state();
        repo.save_snapshot(&SessionSnapshot::capture(&state, fixed_now()))
            .await
            .unwrap();
        repo.delete_snapshot(state.test_id(), state.student_id())
            .await
            .unwrap();
        assert!(repo
            .load_snapshot(state.test_id(), state.student_id())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn first_receipt_wins() {
        let repo = InMemoryRepository::new();
        let receipt = |score: f64| SubmissionReceipt {
            test_id: TestId::new("t1"),
            student_id: StudentId::new("s1"),
            submission_id: uuid::Uuid::new_v4(),
            result: SubmissionResult {
                score,
                per_question_correctness: Vec::new(),
            },
            submitted_at: fixed_now(),
        };

        let first = repo.record_receipt(&receipt(80.0)).await.unwrap();
        let second = repo.record_receipt(&receipt(10.0)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.result.score, 80.0);
    }
}
