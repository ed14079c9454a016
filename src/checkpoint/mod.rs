//! Checkpoint subsystem
//!
//! Point-in-time snapshots of a job's execution state, written as versioned
//! gzip-compressed JSON under a per-crawl directory, each with a sibling
//! uncompressed metadata file so listings never need decompression.
//!
//! Checkpoints are created on demand, on pause, on error, and automatically
//! every N processed documents. A checkpoint whose recorded state is
//! terminal can never be the source of a resume.

use crate::state::{CrawlLedger, JobData, JobMetrics, PhaseProgressSet, StateTransition};
use crate::{EngineError, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Checkpoint format version, bumped on incompatible layout changes
pub const CHECKPOINT_VERSION: u32 = 1;

/// Why a checkpoint was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    /// Automatic periodic checkpoint
    Auto,
    /// Manual user-triggered checkpoint
    Manual,
    /// Checkpoint taken when pausing
    Pause,
    /// Checkpoint taken on error, for recovery
    Error,
}

/// Lightweight checkpoint descriptor, stored uncompressed for fast listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_id: String,
    pub crawl_id: String,
    pub checkpoint_number: u64,
    pub checkpoint_type: CheckpointType,
    pub created_at: DateTime<Utc>,

    pub current_state: String,
    pub current_substate: Option<String>,
    pub progress: PhaseProgressSet,

    pub checkpoint_file: PathBuf,
    pub file_size_bytes: u64,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CheckpointMetadata {
    /// Whether the snapshot can seed a resume (terminal states cannot)
    pub fn can_resume(&self) -> bool {
        !matches!(
            self.current_state.as_str(),
            "completed" | "failed" | "cancelled"
        )
    }
}

/// Full checkpoint payload, everything needed to reconstruct a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub version: u32,
    pub checkpoint_id: String,
    pub crawl_id: String,
    pub created_at: DateTime<Utc>,

    pub current_state: String,
    pub current_substate: Option<String>,

    pub ledger: CrawlLedger,

    pub progress: PhaseProgressSet,
    pub metrics: JobMetrics,
    pub config: serde_json::Value,
    pub state_history: Vec<StateTransition>,

    pub error_count: u32,
    pub last_error: Option<String>,
}

/// Per-crawl checkpoint summary
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointStatistics {
    pub total_checkpoints: usize,
    pub latest_checkpoint_id: Option<String>,
    pub latest_checkpoint_state: Option<String>,
    pub can_resume: bool,
    pub total_size_bytes: u64,
}

/// Creates, lists, loads, and prunes checkpoints
pub struct CheckpointManager {
    storage_dir: PathBuf,
    checkpoints: Mutex<HashMap<String, Vec<CheckpointMetadata>>>,
}

impl CheckpointManager {
    /// Opens a checkpoint store, indexing any checkpoints already on disk
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)?;

        let manager = Self {
            storage_dir,
            checkpoints: Mutex::new(HashMap::new()),
        };
        manager.load_metadata_index()?;
        Ok(manager)
    }

    /// Creates a checkpoint from the job's current state
    ///
    /// Returns the new checkpoint id. The data file is compressed; the
    /// sibling `<id>_meta.json` stays uncompressed.
    pub fn create_checkpoint(
        &self,
        job: &JobData,
        ledger: &CrawlLedger,
        checkpoint_type: CheckpointType,
        metadata: serde_json::Value,
    ) -> Result<String> {
        let mut index = self.checkpoints.lock().expect("checkpoint index poisoned");
        let existing = index.entry(job.crawl_id.clone()).or_default();
        let checkpoint_number = existing.len() as u64;
        let checkpoint_id = format!("{}_ckpt_{}", job.crawl_id, checkpoint_number);

        let data = CheckpointData {
            version: CHECKPOINT_VERSION,
            checkpoint_id: checkpoint_id.clone(),
            crawl_id: job.crawl_id.clone(),
            created_at: Utc::now(),
            current_state: job.current_state.as_str().to_string(),
            current_substate: job.current_substate.map(|s| s.as_str().to_string()),
            ledger: ledger.clone(),
            progress: job.progress,
            metrics: job.metrics.clone(),
            config: serde_json::to_value(&job.config)?,
            state_history: job.state_history.clone(),
            error_count: job.error_count,
            last_error: job.error_message.clone(),
        };

        let crawl_dir = self.storage_dir.join(&job.crawl_id);
        fs::create_dir_all(&crawl_dir)?;

        let checkpoint_file = crawl_dir.join(format!("{}.json.gz", checkpoint_id));
        let mut encoder = GzEncoder::new(File::create(&checkpoint_file)?, Compression::default());
        encoder.write_all(&serde_json::to_vec(&data)?)?;
        encoder.finish()?;

        let meta = CheckpointMetadata {
            checkpoint_id: checkpoint_id.clone(),
            crawl_id: job.crawl_id.clone(),
            checkpoint_number,
            checkpoint_type,
            created_at: data.created_at,
            current_state: data.current_state.clone(),
            current_substate: data.current_substate.clone(),
            progress: data.progress,
            checkpoint_file: checkpoint_file.clone(),
            file_size_bytes: fs::metadata(&checkpoint_file)?.len(),
            metadata,
        };

        let meta_file = crawl_dir.join(format!("{}_meta.json", checkpoint_id));
        fs::write(&meta_file, serde_json::to_vec_pretty(&meta)?)?;

        existing.push(meta);

        tracing::debug!(
            "Created {:?} checkpoint {} for {}",
            checkpoint_type,
            checkpoint_id,
            job.crawl_id
        );

        Ok(checkpoint_id)
    }

    /// Loads and decompresses a checkpoint's full payload
    pub fn get_checkpoint(&self, checkpoint_id: &str) -> Result<CheckpointData> {
        let file = {
            let index = self.checkpoints.lock().expect("checkpoint index poisoned");
            self.find_meta(&index, checkpoint_id)
                .map(|m| m.checkpoint_file.clone())
                .ok_or_else(|| EngineError::CheckpointNotFound(checkpoint_id.to_string()))?
        };

        let mut decoder = GzDecoder::new(File::open(&file)?);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        let data: CheckpointData = serde_json::from_slice(&buf)?;

        if data.version != CHECKPOINT_VERSION {
            tracing::warn!(
                "Checkpoint {} has version {} (expected {})",
                checkpoint_id,
                data.version,
                CHECKPOINT_VERSION
            );
        }

        Ok(data)
    }

    /// The most recent checkpoint for a crawl
    pub fn get_latest(&self, crawl_id: &str) -> Option<CheckpointMetadata> {
        let index = self.checkpoints.lock().expect("checkpoint index poisoned");
        index.get(crawl_id).and_then(|list| list.last().cloned())
    }

    /// All checkpoints for a crawl, ascending by checkpoint number
    pub fn list(&self, crawl_id: &str) -> Vec<CheckpointMetadata> {
        let index = self.checkpoints.lock().expect("checkpoint index poisoned");
        index.get(crawl_id).cloned().unwrap_or_default()
    }

    /// Loads a checkpoint for resuming
    ///
    /// With `validate` set, checkpoints recorded in a terminal state are
    /// rejected and `None` is returned.
    pub fn resume_from_checkpoint(
        &self,
        checkpoint_id: &str,
        validate: bool,
    ) -> Result<Option<CheckpointData>> {
        let data = self.get_checkpoint(checkpoint_id)?;

        if validate
            && matches!(
                data.current_state.as_str(),
                "completed" | "failed" | "cancelled"
            )
        {
            tracing::warn!(
                "Refusing to resume {} from terminal state '{}'",
                checkpoint_id,
                data.current_state
            );
            return Ok(None);
        }

        Ok(Some(data))
    }

    /// Deletes a checkpoint's data and metadata files
    pub fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool> {
        let mut index = self.checkpoints.lock().expect("checkpoint index poisoned");

        for list in index.values_mut() {
            if let Some(pos) = list.iter().position(|m| m.checkpoint_id == checkpoint_id) {
                let meta = list.remove(pos);
                if meta.checkpoint_file.exists() {
                    fs::remove_file(&meta.checkpoint_file)?;
                }
                let meta_file = meta
                    .checkpoint_file
                    .with_file_name(format!("{}_meta.json", checkpoint_id));
                if meta_file.exists() {
                    fs::remove_file(&meta_file)?;
                }
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Deletes all but the most recent `keep_last` checkpoints for a crawl
    ///
    /// Returns the number of checkpoints deleted.
    pub fn prune(&self, crawl_id: &str, keep_last: usize) -> Result<usize> {
        let to_delete: Vec<String> = {
            let index = self.checkpoints.lock().expect("checkpoint index poisoned");
            match index.get(crawl_id) {
                Some(list) if list.len() > keep_last => list
                    [..list.len() - keep_last]
                    .iter()
                    .map(|m| m.checkpoint_id.clone())
                    .collect(),
                _ => return Ok(0),
            }
        };

        let mut deleted = 0;
        for checkpoint_id in to_delete {
            if self.delete_checkpoint(&checkpoint_id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Checkpoint summary for a crawl
    pub fn statistics(&self, crawl_id: &str) -> CheckpointStatistics {
        let index = self.checkpoints.lock().expect("checkpoint index poisoned");
        let list = index.get(crawl_id).cloned().unwrap_or_default();
        let latest = list.last();

        CheckpointStatistics {
            total_checkpoints: list.len(),
            latest_checkpoint_id: latest.map(|m| m.checkpoint_id.clone()),
            latest_checkpoint_state: latest.map(|m| m.current_state.clone()),
            can_resume: latest.map(|m| m.can_resume()).unwrap_or(false),
            total_size_bytes: list.iter().map(|m| m.file_size_bytes).sum(),
        }
    }

    /// Removes every checkpoint for a crawl (used by job deletion)
    pub fn delete_all_for_crawl(&self, crawl_id: &str) -> Result<usize> {
        let ids: Vec<String> = self
            .list(crawl_id)
            .into_iter()
            .map(|m| m.checkpoint_id)
            .collect();
        let mut deleted = 0;
        for id in ids {
            if self.delete_checkpoint(&id)? {
                deleted += 1;
            }
        }
        let crawl_dir = self.storage_dir.join(crawl_id);
        if crawl_dir.exists() {
            // Only removed when empty; unknown files are left alone.
            let _ = fs::remove_dir(&crawl_dir);
        }
        Ok(deleted)
    }

    fn find_meta<'a>(
        &self,
        index: &'a HashMap<String, Vec<CheckpointMetadata>>,
        checkpoint_id: &str,
    ) -> Option<&'a CheckpointMetadata> {
        index
            .values()
            .flat_map(|list| list.iter())
            .find(|m| m.checkpoint_id == checkpoint_id)
    }

    /// Indexes `*_meta.json` files found under the storage directory
    fn load_metadata_index(&self) -> Result<()> {
        let mut index = self.checkpoints.lock().expect("checkpoint index poisoned");

        for entry in fs::read_dir(&self.storage_dir)? {
            let crawl_dir = entry?.path();
            if !crawl_dir.is_dir() {
                continue;
            }
            let crawl_id = match crawl_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            let mut list: Vec<CheckpointMetadata> = Vec::new();
            for meta_entry in fs::read_dir(&crawl_dir)? {
                let path = meta_entry?.path();
                let is_meta = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with("_meta.json"))
                    .unwrap_or(false);
                if !is_meta {
                    continue;
                }
                match fs::read(&path)
                    .map_err(EngineError::from)
                    .and_then(|bytes| serde_json::from_slice(&bytes).map_err(EngineError::from))
                {
                    Ok(meta) => list.push(meta),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable checkpoint metadata {:?}: {}", path, e)
                    }
                }
            }

            if !list.is_empty() {
                list.sort_by_key(|m| m.checkpoint_number);
                index.insert(crawl_id, list);
            }
        }

        Ok(())
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}
