//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{StudentId, TestError, TestId};
use exam_core::session::SessionConfigError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted while reading engine configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} must be true or false, got {value:?}")]
    InvalidFlag { var: &'static str, value: String },
}

/// Errors emitted by a `TestSource`. Fatal at session open.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("test {0} not found")]
    NotFound(TestId),
    #[error("test source returned status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("test payload could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Invalid(#[from] TestError),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by a `SubmissionSink`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("submission rejected with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("submission response could not be decoded: {0}")]
    Decode(String),
}

impl SubmissionError {
    /// Whether resending the same payload may succeed.
    ///
    /// Network failures, rate limiting and server-side (5xx) errors are
    /// transient. Client errors and undecodable responses are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Errors emitted by session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("test {test_id} was already submitted by {student_id}")]
    AlreadySubmitted {
        test_id: TestId,
        student_id: StudentId,
    },
    #[error("session runner stopped: {0}")]
    RunnerStopped(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Timing(#[from] SessionConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
