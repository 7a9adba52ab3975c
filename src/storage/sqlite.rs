//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of [`FrontierStore`] and a
//! run-bound [`ResultSink`] on top of it.

use crate::frontier::{CrawlOutcome, CrawlResult, CrawlTask, FrontierState, PendingTask};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FrontierStore, ResultSink, StorageError, StorageResult};
use crate::storage::{RunStats, RunStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

const SEEN_VISITED: &str = "visited";
const SEEN_EXCLUDED: &str = "excluded";

/// SQLite storage backend
///
/// The connection sits behind a mutex so one instance can be shared by the
/// controller, its checkpoint task and every worker.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A result sink writing into this database under `run_key`
    pub fn result_sink(self: &Arc<Self>, run_key: impl Into<String>) -> SqliteResultSink {
        SqliteResultSink {
            storage: Arc::clone(self),
            run_key: run_key.into(),
        }
    }

    /// Counters of a persisted run, or None if the run is unknown
    pub fn run_stats(&self, run_key: &str) -> StorageResult<Option<RunStats>> {
        let conn = self.conn();

        let run = conn
            .query_row(
                "SELECT status, started_at, updated_at FROM runs WHERE run_key = ?1",
                params![run_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, started_at, updated_at)) = run else {
            return Ok(None);
        };

        let count = |sql: &str| -> StorageResult<usize> {
            let n: i64 = conn.query_row(sql, params![run_key], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(Some(RunStats {
            run_key: run_key.to_string(),
            status: RunStatus::from_db_string(&status).unwrap_or(RunStatus::Interrupted),
            started_at,
            updated_at,
            pending: count("SELECT COUNT(*) FROM pending WHERE run_key = ?1")?,
            visited: count("SELECT COUNT(*) FROM seen WHERE run_key = ?1 AND kind = 'visited'")?,
            excluded: count(
                "SELECT COUNT(*) FROM seen WHERE run_key = ?1 AND kind = 'excluded'",
            )?,
            hosts: count("SELECT COUNT(*) FROM domain_counters WHERE run_key = ?1")?,
            results: count("SELECT COUNT(*) FROM results WHERE run_key = ?1")?,
        }))
    }

    /// Number of results stored for a run
    pub fn count_results(&self, run_key: &str) -> StorageResult<usize> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM results WHERE run_key = ?1",
            params![run_key],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn insert_result(&self, run_key: &str, result: &CrawlResult) -> StorageResult<()> {
        let task = &result.task;
        let (outcome, status_code, content_type, final_url, failure_kind, message, links) =
            match &result.outcome {
                CrawlOutcome::Success {
                    status_code,
                    content_type,
                    final_url,
                    extracted_links,
                    ..
                } => (
                    "success",
                    Some(*status_code),
                    content_type.clone(),
                    Some(final_url.to_string()),
                    None,
                    None,
                    Some(extracted_links.len() as i64),
                ),
                CrawlOutcome::Failure { kind, message } => (
                    "failure",
                    None,
                    None,
                    None,
                    Some(kind.as_str()),
                    Some(message.clone()),
                    None,
                ),
                CrawlOutcome::Skipped { reason } => (
                    "skipped",
                    None,
                    None,
                    None,
                    None,
                    Some(reason.to_string()),
                    None,
                ),
            };

        self.conn().execute(
            "INSERT INTO results (run_key, url, fingerprint, depth, parent_url, outcome,
                status_code, content_type, final_url, failure_kind, message, links_found,
                attempts, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run_key,
                task.url.as_str(),
                task.fingerprint,
                task.depth,
                task.parent_url.as_ref().map(Url::as_str),
                outcome,
                status_code,
                content_type,
                final_url,
                failure_kind,
                message,
                links,
                result.attempts,
                result.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn upsert_run(conn: &Connection, run_key: &str, status: RunStatus) -> StorageResult<()> {
    let now = Utc::now().to_rfc3339();
    let finished_at = matches!(status, RunStatus::Completed).then(|| now.clone());
    conn.execute(
        "INSERT INTO runs (run_key, status, started_at, updated_at, finished_at)
         VALUES (?1, ?2, ?3, ?3, ?4)
         ON CONFLICT(run_key) DO UPDATE SET
            status = excluded.status,
            updated_at = excluded.updated_at,
            finished_at = COALESCE(excluded.finished_at, runs.finished_at)",
        params![run_key, status.to_db_string(), now, finished_at],
    )?;
    Ok(())
}

fn parse_url(raw: &str) -> StorageResult<Url> {
    Url::parse(raw).map_err(|e| StorageError::Serialization(format!("bad url '{}': {}", raw, e)))
}

fn parse_time(raw: &str) -> StorageResult<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", raw, e)))
}

impl FrontierStore for SqliteStorage {
    fn save_state(&self, run_key: &str, state: &FrontierState) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM runs WHERE run_key = ?1",
                params![run_key],
                |row| row.get(0),
            )
            .optional()?;
        let status = status
            .as_deref()
            .and_then(RunStatus::from_db_string)
            .unwrap_or(RunStatus::Running);
        upsert_run(&tx, run_key, status)?;

        tx.execute("DELETE FROM pending WHERE run_key = ?1", params![run_key])?;
        tx.execute("DELETE FROM seen WHERE run_key = ?1", params![run_key])?;
        tx.execute(
            "DELETE FROM domain_counters WHERE run_key = ?1",
            params![run_key],
        )?;

        {
            let mut insert_pending = tx.prepare(
                "INSERT INTO pending (run_key, seq, url, depth, parent_url, discovered_at, attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (seq, pending) in state.pending.iter().enumerate() {
                let task = &pending.task;
                insert_pending.execute(params![
                    run_key,
                    seq as i64,
                    task.url.as_str(),
                    task.depth,
                    task.parent_url.as_ref().map(Url::as_str),
                    task.discovered_at.to_rfc3339(),
                    pending.attempts,
                ])?;
            }

            let mut insert_seen = tx.prepare(
                "INSERT OR REPLACE INTO seen (run_key, fingerprint, kind) VALUES (?1, ?2, ?3)",
            )?;
            for fp in &state.visited {
                insert_seen.execute(params![run_key, fp, SEEN_VISITED])?;
            }
            for fp in &state.excluded {
                insert_seen.execute(params![run_key, fp, SEEN_EXCLUDED])?;
            }

            let mut insert_counter = tx.prepare(
                "INSERT INTO domain_counters (run_key, host, count) VALUES (?1, ?2, ?3)",
            )?;
            for (host, count) in &state.domain_counters {
                insert_counter.execute(params![run_key, host, *count as i64])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn load_state(&self, run_key: &str) -> StorageResult<Option<FrontierState>> {
        let conn = self.conn();

        let known: Option<String> = conn
            .query_row(
                "SELECT run_key FROM runs WHERE run_key = ?1",
                params![run_key],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Ok(None);
        }

        let mut state = FrontierState::default();

        let mut stmt = conn.prepare(
            "SELECT url, depth, parent_url, discovered_at, attempts
             FROM pending WHERE run_key = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![run_key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
            ))
        })?;
        for row in rows {
            let (url, depth, parent, discovered_at, attempts) = row?;
            let parent_url = parent.as_deref().map(parse_url).transpose()?;
            let task = CrawlTask::from_normalized(
                parse_url(&url)?,
                depth,
                parent_url,
                parse_time(&discovered_at)?,
            );
            state.pending.push(PendingTask { task, attempts });
        }

        let mut stmt = conn.prepare("SELECT fingerprint, kind FROM seen WHERE run_key = ?1")?;
        let rows = stmt.query_map(params![run_key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (fp, kind) = row?;
            match kind.as_str() {
                SEEN_VISITED => {
                    state.visited.insert(fp);
                }
                SEEN_EXCLUDED => {
                    state.excluded.insert(fp);
                }
                other => {
                    return Err(StorageError::Serialization(format!(
                        "unknown seen kind '{}'",
                        other
                    )))
                }
            }
        }

        let mut stmt =
            conn.prepare("SELECT host, count FROM domain_counters WHERE run_key = ?1")?;
        let rows = stmt.query_map(params![run_key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (host, count) = row?;
            state.domain_counters.insert(host, count as usize);
        }

        Ok(Some(state))
    }

    fn mark_run(&self, run_key: &str, status: RunStatus) -> StorageResult<()> {
        upsert_run(&self.conn(), run_key, status)
    }

    fn run_status(&self, run_key: &str) -> StorageResult<Option<RunStatus>> {
        let status: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM runs WHERE run_key = ?1",
                params![run_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().and_then(RunStatus::from_db_string))
    }

    fn clear_run(&self, run_key: &str) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for table in ["pending", "seen", "domain_counters", "results", "runs"] {
            tx.execute(
                &format!("DELETE FROM {} WHERE run_key = ?1", table),
                params![run_key],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// [`ResultSink`] that appends to the `results` table of one run
#[derive(Debug, Clone)]
pub struct SqliteResultSink {
    storage: Arc<SqliteStorage>,
    run_key: String,
}

impl ResultSink for SqliteResultSink {
    fn store(&self, result: &CrawlResult) -> StorageResult<()> {
        self.storage.insert_result(&self.run_key, result)
    }
}
