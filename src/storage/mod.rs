//! Storage module for persisting crawl state
//!
//! This module handles everything that outlives a process:
//! - SQLite database initialization and schema management
//! - Frontier checkpoints keyed by crawl-run identity
//! - Run status tracking for resumption
//! - Result sinks for finished tasks

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemorySink;
pub use sqlite::{SqliteResultSink, SqliteStorage};
pub use traits::{FrontierStore, ResultSink, StorageError, StorageResult};

use std::path::Path;

/// File name of the frontier database inside the storage folder
pub const DATABASE_FILE: &str = "frontier.db";

/// Opens (creating if needed) the frontier database in a storage folder
///
/// # Arguments
///
/// * `folder` - The run's storage folder; created if missing
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - The folder or the database could not be opened
pub fn open_storage(folder: &Path) -> StorageResult<SqliteStorage> {
    std::fs::create_dir_all(folder)?;
    SqliteStorage::new(&folder.join(DATABASE_FILE))
}

/// Counters of a persisted run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub run_key: String,
    pub status: RunStatus,
    pub started_at: String,
    pub updated_at: String,
    pub pending: usize,
    pub visited: usize,
    pub excluded: usize,
    pub hosts: usize,
    pub results: usize,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
