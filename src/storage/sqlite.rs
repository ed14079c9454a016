//! SQLite job store implementation

use crate::state::{JobData, JobState, JobSubstate};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite-backed job store
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Opens (or creates) the jobs database at the given path
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory store (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn row_to_job(row: &Row<'_>) -> rusqlite::Result<RawJobRow> {
        Ok(RawJobRow {
            crawl_id: row.get(0)?,
            current_state: row.get(1)?,
            current_substate: row.get(2)?,
            created_at: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            paused_at: row.get(6)?,
            error_message: row.get(7)?,
            error_count: row.get(8)?,
            config: row.get(9)?,
            progress: row.get(10)?,
            metrics: row.get(11)?,
            state_history: row.get(12)?,
        })
    }
}

/// One row as stored, before decoding into `JobData`
struct RawJobRow {
    crawl_id: String,
    current_state: String,
    current_substate: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    paused_at: Option<String>,
    error_message: Option<String>,
    error_count: u32,
    config: String,
    progress: String,
    metrics: String,
    state_history: String,
}

impl RawJobRow {
    fn decode(self) -> StorageResult<JobData> {
        let corrupt = |message: String| StorageError::CorruptRow {
            crawl_id: self.crawl_id.clone(),
            message,
        };

        let current_state = JobState::parse(&self.current_state)
            .ok_or_else(|| corrupt(format!("unknown state '{}'", self.current_state)))?;
        let current_substate = match &self.current_substate {
            Some(value) => Some(
                JobSubstate::parse(value)
                    .ok_or_else(|| corrupt(format!("unknown substate '{}'", value)))?,
            ),
            None => None,
        };

        let parse_time = |value: &str| -> StorageResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp '{}': {}", value, e)))
        };
        let parse_opt_time = |value: &Option<String>| -> StorageResult<Option<DateTime<Utc>>> {
            value.as_deref().map(parse_time).transpose()
        };

        Ok(JobData {
            crawl_id: self.crawl_id.clone(),
            current_state,
            current_substate,
            config: serde_json::from_str(&self.config)?,
            created_at: parse_time(&self.created_at)?,
            started_at: parse_opt_time(&self.started_at)?,
            completed_at: parse_opt_time(&self.completed_at)?,
            paused_at: parse_opt_time(&self.paused_at)?,
            progress: serde_json::from_str(&self.progress)?,
            metrics: serde_json::from_str(&self.metrics)?,
            state_history: serde_json::from_str(&self.state_history)?,
            error_message: self.error_message,
            error_count: self.error_count,
        })
    }
}

const SELECT_COLUMNS: &str = "crawl_id, current_state, current_substate, created_at, \
                              started_at, completed_at, paused_at, error_message, error_count, \
                              config, progress, metrics, state_history";

impl JobStore for SqliteJobStore {
    fn save_job(&mut self, job: &JobData) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO jobs (crawl_id, current_state, current_substate, created_at, \
             started_at, completed_at, paused_at, error_message, error_count, config, progress, \
             metrics, state_history, saved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.crawl_id,
                job.current_state.as_str(),
                job.current_substate.map(|s| s.as_str()),
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.paused_at.map(|t| t.to_rfc3339()),
                job.error_message,
                job.error_count,
                serde_json::to_string(&job.config)?,
                serde_json::to_string(&job.progress)?,
                serde_json::to_string(&job.metrics)?,
                serde_json::to_string(&job.state_history)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_job(&self, crawl_id: &str) -> StorageResult<Option<JobData>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE crawl_id = ?1",
            SELECT_COLUMNS
        ))?;

        let raw = stmt
            .query_row(params![crawl_id], Self::row_to_job)
            .optional()?;

        raw.map(RawJobRow::decode).transpose()
    }

    fn delete_job(&mut self, crawl_id: &str) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM jobs WHERE crawl_id = ?1", params![crawl_id])?;
        Ok(deleted > 0)
    }

    fn list_job_ids(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT crawl_id FROM jobs ORDER BY crawl_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn load_all_jobs(&self) -> StorageResult<Vec<JobData>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM jobs", SELECT_COLUMNS))?;
        let rows = stmt
            .query_map([], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<RawJobRow>>>()?;

        let mut jobs = Vec::new();
        for raw in rows {
            let crawl_id = raw.crawl_id.clone();
            match raw.decode() {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!("Skipping undecodable job row {}: {}", crawl_id, e),
            }
        }
        Ok(jobs)
    }
}
