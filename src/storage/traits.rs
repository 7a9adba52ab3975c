//! Storage traits and error types
//!
//! This module defines the two seams the crawl engine persists through: the
//! [`FrontierStore`] that makes a run resumable and the [`ResultSink`] that receives
//! every finished task.

use crate::frontier::{CrawlResult, FrontierState};
use crate::storage::RunStatus;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable frontier state, keyed by crawl-run identity
///
/// Implementations are shared between the controller and its checkpoint task, so
/// they take `&self` and synchronize internally.
pub trait FrontierStore: Send + Sync {
    /// Replaces the persisted state of a run
    fn save_state(&self, run_key: &str, state: &FrontierState) -> StorageResult<()>;

    /// Loads the persisted state of a run, or None if the run is unknown
    fn load_state(&self, run_key: &str) -> StorageResult<Option<FrontierState>>;

    /// Records the lifecycle status of a run
    fn mark_run(&self, run_key: &str, status: RunStatus) -> StorageResult<()>;

    /// The last recorded status of a run
    fn run_status(&self, run_key: &str) -> StorageResult<Option<RunStatus>>;

    /// Forgets everything persisted for a run
    fn clear_run(&self, run_key: &str) -> StorageResult<()>;
}

/// Receives finished crawl results
///
/// Errors are reported back to the caller, which logs them; a failing sink never
/// stops the crawl.
pub trait ResultSink: Send + Sync {
    fn store(&self, result: &CrawlResult) -> StorageResult<()>;
}
