//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the frontier database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl-run identity
CREATE TABLE IF NOT EXISTS runs (
    run_key TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    finished_at TEXT
);

-- Tasks waiting to be fetched, in dequeue order
CREATE TABLE IF NOT EXISTS pending (
    run_key TEXT NOT NULL REFERENCES runs(run_key),
    seq INTEGER NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    parent_url TEXT,
    discovered_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (run_key, seq)
);

-- Fingerprints already handled: 'visited' or 'excluded'
CREATE TABLE IF NOT EXISTS seen (
    run_key TEXT NOT NULL REFERENCES runs(run_key),
    fingerprint TEXT NOT NULL,
    kind TEXT NOT NULL,
    PRIMARY KEY (run_key, fingerprint)
);

CREATE TABLE IF NOT EXISTS domain_counters (
    run_key TEXT NOT NULL REFERENCES runs(run_key),
    host TEXT NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (run_key, host)
);

-- Final outcome of every task
CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_key TEXT NOT NULL,
    url TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    depth INTEGER NOT NULL,
    parent_url TEXT,
    outcome TEXT NOT NULL,
    status_code INTEGER,
    content_type TEXT,
    final_url TEXT,
    failure_kind TEXT,
    message TEXT,
    links_found INTEGER,
    attempts INTEGER NOT NULL,
    finished_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_key);
CREATE INDEX IF NOT EXISTS idx_results_fingerprint ON results(fingerprint);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
