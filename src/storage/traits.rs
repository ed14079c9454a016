//! Job store trait and error types

use crate::state::JobData;
use thiserror::Error;

/// Errors that can occur during job store operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt job row for {crawl_id}: {message}")]
    CorruptRow { crawl_id: String, message: String },
}

/// Result type for job store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for durable job state backends
///
/// Implementations persist the complete `JobData` so a restart can
/// reconstruct every job, including its transition history.
pub trait JobStore {
    /// Inserts or replaces a job's persisted state
    fn save_job(&mut self, job: &JobData) -> StorageResult<()>;

    /// Loads one job, `None` when absent
    fn load_job(&self, crawl_id: &str) -> StorageResult<Option<JobData>>;

    /// Deletes a job's persisted state; returns whether a row existed
    fn delete_job(&mut self, crawl_id: &str) -> StorageResult<bool>;

    /// All persisted job ids
    fn list_job_ids(&self) -> StorageResult<Vec<String>>;

    /// Loads every persisted job, skipping rows that fail to decode
    fn load_all_jobs(&self) -> StorageResult<Vec<JobData>>;
}
