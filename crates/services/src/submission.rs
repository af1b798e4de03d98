use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use exam_core::model::{AnswerRecord, QuestionCorrectness, QuestionId, SubmissionResult};

use crate::error::SubmissionError;
use crate::http::{Envelope, WireId, endpoint};

/// Write side of the exam backend: grades a frozen answer record.
///
/// Implementations must be safe to call again with the same record; the
/// controller resends on transient failures and cannot tell a lost request
/// from a lost response.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// Send the answer record and return the server-computed result.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError` on network, server or decoding failures.
    async fn submit(&self, record: &AnswerRecord) -> Result<SubmissionResult, SubmissionError>;
}

//
// ─── RETRY POLICY ──────────────────────────────────────────────────────────────
//

/// Bounded exponential backoff for submission retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Delay to wait after the `failed_attempt`-th attempt (1-based) failed.
    ///
    /// Doubles from `initial_delay` and is capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1_u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Like `delay_for`, but never shorter than a server-provided retry hint.
    #[must_use]
    pub fn delay_after(&self, failed_attempt: u32, error: &SubmissionError) -> Duration {
        let base = self.delay_for(failed_attempt);
        match error {
            SubmissionError::RateLimited {
                retry_after_ms: Some(ms),
            } => base.max(Duration::from_millis(*ms)).min(self.max_delay),
            _ => base,
        }
    }
}

//
// ─── HTTP SINK ─────────────────────────────────────────────────────────────────
//

/// `POST {base}/tests/{id}/submit` with the record as JSON body.
///
/// The record's `submission_id` travels as the `Idempotency-Key` header so the
/// backend can collapse resends.
#[derive(Clone)]
pub struct HttpSubmissionSink {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpSubmissionSink {
    #[must_use]
    pub fn new(base_url: Url, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl SubmissionSink for HttpSubmissionSink {
    #[instrument(skip(self, record), fields(test_id = %record.test_id, student_id = %record.student_id, submission_id = %record.submission_id))]
    async fn submit(&self, record: &AnswerRecord) -> Result<SubmissionResult, SubmissionError> {
        let url = endpoint(&self.base_url, &["tests", record.test_id.as_str(), "submit"])
            .map_err(|e| SubmissionError::Network(e.to_string()))?;

        let mut request = self
            .client
            .post(url)
            .header("Idempotency-Key", record.submission_id.to_string())
            .json(record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SubmissionError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000));
            return Err(SubmissionError::RateLimited { retry_after_ms });
        }
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(SubmissionError::Status { status, message });
        }

        let body = response
            .text()
            .await
            .map_err(|e| SubmissionError::Network(e.to_string()))?;
        let wire: Envelope<WireResult> =
            serde_json::from_str(&body).map_err(|e| SubmissionError::Decode(e.to_string()))?;
        Ok(wire.into_inner().into())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    score: f64,
    #[serde(default)]
    per_question_correctness: Vec<WireCorrectness>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCorrectness {
    question_id: WireId,
    correct: bool,
}

impl From<WireResult> for SubmissionResult {
    fn from(wire: WireResult) -> Self {
        Self {
            score: wire.score,
            per_question_correctness: wire
                .per_question_correctness
                .into_iter()
                .map(|c| QuestionCorrectness {
                    question_id: QuestionId::new(c.question_id.into_string()),
                    correct: c.correct,
                })
                .collect(),
        }
    }
}
