#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    InMemoryRepository, SaveOutcome, SessionSnapshotRepository, Storage, StorageError,
    SubmissionReceiptRepository,
};
