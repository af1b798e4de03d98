use exam_core::model::{StudentId, TestId};
use exam_core::session::SessionSnapshot;
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, decode_json, encode_json, sequence_from_i64, sequence_to_i64, ser};
use crate::repository::{SaveOutcome, SessionSnapshotRepository, StorageError};

#[async_trait::async_trait]
impl SessionSnapshotRepository for SqliteRepository {
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<SaveOutcome, StorageError> {
        let sequence = sequence_to_i64(snapshot.sequence)?;
        let payload = encode_json(snapshot)?;

        // Equal sequences overwrite; only strictly older writes are dropped.
        let res = sqlx::query(
            r"
            INSERT INTO session_snapshots (test_id, student_id, sequence, saved_at, status, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(test_id, student_id) DO UPDATE SET
                sequence = excluded.sequence,
                saved_at = excluded.saved_at,
                status = excluded.status,
                payload = excluded.payload
            WHERE excluded.sequence >= session_snapshots.sequence
            ",
        )
        .bind(snapshot.test_id().as_str())
        .bind(snapshot.student_id().as_str())
        .bind(sequence)
        .bind(snapshot.saved_at)
        .bind(snapshot.state.status().as_str())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() > 0 {
            return Ok(SaveOutcome::Written);
        }

        let row = sqlx::query(
            r"
            SELECT sequence FROM session_snapshots
            WHERE test_id = ?1 AND student_id = ?2
            ",
        )
        .bind(snapshot.test_id().as_str())
        .bind(snapshot.student_id().as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;
        let stored = sequence_from_i64(row.try_get("sequence").map_err(ser)?)?;
        tracing::debug!(
            test_id = %snapshot.test_id(),
            student_id = %snapshot.student_id(),
            stored,
            incoming = snapshot.sequence,
            "discarded stale snapshot"
        );

        Ok(SaveOutcome::Stale {
            stored_sequence: stored,
        })
    }

    async fn load_snapshot(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<Option<SessionSnapshot>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT sequence, payload FROM session_snapshots
            WHERE test_id = ?1 AND student_id = ?2
            ",
        )
        .bind(test_id.as_str())
        .bind(student_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.try_get("payload").map_err(ser)?;
        let mut snapshot: SessionSnapshot = decode_json(&payload)?;
        // The column is authoritative if the payload was written by an older build.
        snapshot.sequence = sequence_from_i64(row.try_get("sequence").map_err(ser)?)?;
        Ok(Some(snapshot))
    }

    async fn delete_snapshot(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_snapshots WHERE test_id = ?1 AND student_id = ?2")
            .bind(test_id.as_str())
            .bind(student_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }
}
