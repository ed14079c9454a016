//! Append-only JSONL event log
//!
//! One file per crawl, one JSON object per line. The (external) log-parsing
//! endpoints read these files; the engine only ever appends. Appends are
//! best-effort: a write failure is reported to the caller, who logs it and
//! moves on.

use crate::events::CrawlEvent;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes crawl events to per-job JSONL files
pub struct EventLog {
    dir: PathBuf,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the log file for one crawl
    pub fn path_for(&self, crawl_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", crawl_id))
    }

    /// Appends one event to its crawl's log file
    pub fn append(&self, event: &CrawlEvent) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let line = event
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&event.crawl_id))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Removes the log file for a deleted crawl
    pub fn remove(&self, crawl_id: &str) -> std::io::Result<()> {
        let path = self.path_for(crawl_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
