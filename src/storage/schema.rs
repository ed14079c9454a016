//! Database schema for the job store

use rusqlite::Connection;

/// SQL schema for the jobs database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl job; structured fields are JSON columns serialized
-- from the typed job state
CREATE TABLE IF NOT EXISTS jobs (
    crawl_id TEXT PRIMARY KEY,
    current_state TEXT NOT NULL,
    current_substate TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    paused_at TEXT,
    error_message TEXT,
    error_count INTEGER NOT NULL DEFAULT 0,
    config TEXT NOT NULL,
    progress TEXT NOT NULL,
    metrics TEXT NOT NULL,
    state_history TEXT NOT NULL,
    saved_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(current_state);
CREATE INDEX IF NOT EXISTS idx_jobs_started ON jobs(started_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
