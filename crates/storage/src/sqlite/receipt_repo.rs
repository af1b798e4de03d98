use exam_core::model::{StudentId, SubmissionReceipt, TestId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, decode_json, encode_json, ser};
use crate::repository::{StorageError, SubmissionReceiptRepository};

impl SqliteRepository {
    async fn fetch_receipt(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<Option<SubmissionReceipt>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT payload FROM submission_receipts
            WHERE test_id = ?1 AND student_id = ?2
            ",
        )
        .bind(test_id.as_str())
        .bind(student_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(ser)?;
                decode_json(&payload).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl SubmissionReceiptRepository for SqliteRepository {
    async fn record_receipt(
        &self,
        receipt: &SubmissionReceipt,
    ) -> Result<SubmissionReceipt, StorageError> {
        sqlx::query(
            r"
            INSERT INTO submission_receipts (test_id, student_id, submission_id, score, payload, submitted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(test_id, student_id) DO NOTHING
            ",
        )
        .bind(receipt.test_id.as_str())
        .bind(receipt.student_id.as_str())
        .bind(receipt.submission_id.to_string())
        .bind(receipt.result.score)
        .bind(encode_json(receipt)?)
        .bind(receipt.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        self.fetch_receipt(&receipt.test_id, &receipt.student_id)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn get_receipt(
        &self,
        test_id: &TestId,
        student_id: &StudentId,
    ) -> Result<Option<SubmissionReceipt>, StorageError> {
        self.fetch_receipt(test_id, student_id).await
    }
}
