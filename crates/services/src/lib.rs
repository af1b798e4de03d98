#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod error;
mod http;
pub mod persistence;
pub mod session_loop;
pub mod session_service;
pub mod submission;
pub mod test_source;

pub use exam_core::Clock;

pub use config::EngineConfig;
pub use controller::{SessionController, SessionEvent};
pub use error::{ConfigError, LoadError, SessionError, SubmissionError};
pub use persistence::SnapshotWriter;
pub use session_loop::{SessionHandle, SessionRunner};
pub use session_service::{ExamSessionService, OpenOptions};
pub use submission::{HttpSubmissionSink, RetryPolicy, SubmissionSink};
pub use test_source::{HttpTestSource, StaticTestSource, TestSource};
