//! Iteration subsystem: multi-pass crawling and change detection
//!
//! A logical crawl can run many times. Each pass is an iteration linked to
//! its parent (the previous pass) and the baseline (iteration 0). Document
//! fingerprints (content hash plus cache-validation headers) recorded per
//! iteration drive incremental crawling and new/modified/unchanged/deleted
//! classification between passes.

use crate::fsutil::write_atomic;
use crate::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// How an iteration treats previously seen documents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationMode {
    /// Full crawl establishing the baseline
    #[default]
    Baseline,
    /// Fetch only new or modified content
    Incremental,
    /// Full crawl, compared against the previous pass afterwards
    Full,
}

/// Change classification for one document between iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    New,
    Modified,
    Unchanged,
    Deleted,
}

/// A document's identity for change detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub url: String,
    /// SHA-256 of the document body, hex encoded
    pub content_hash: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub file_size: u64,
    pub captured_at: DateTime<Utc>,
}

/// Diff between two iterations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationComparison {
    pub baseline_iteration_id: String,
    pub current_iteration_id: String,
    pub new_documents: Vec<String>,
    pub modified_documents: Vec<String>,
    pub unchanged_documents: Vec<String>,
    pub deleted_documents: Vec<String>,
}

impl IterationComparison {
    pub fn total_changes(&self) -> usize {
        self.new_documents.len() + self.modified_documents.len() + self.deleted_documents.len()
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}

/// Per-iteration statistics, merged in at completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationStats {
    pub new_documents: u64,
    pub modified_documents: u64,
    pub unchanged_documents: u64,
    pub deleted_documents: u64,
    pub total_documents: u64,
    pub urls_crawled: u64,
    pub urls_failed: u64,
}

/// Metadata for one crawl iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationMetadata {
    pub iteration_id: String,
    /// Logical crawl id, shared by every iteration of the same crawl
    pub crawl_id: String,
    /// 0 is the baseline
    pub iteration_number: u64,
    pub parent_iteration_id: Option<String>,
    pub baseline_iteration_id: Option<String>,

    pub mode: IterationMode,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub config: serde_json::Value,
    pub stats: IterationStats,

    pub fingerprints_file: PathBuf,
}

impl IterationMetadata {
    pub fn duration_seconds(&self) -> Option<f64> {
        let completed = self.completed_at?;
        Some((completed - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Iteration summary including the comparison with its parent
#[derive(Debug, Clone, Serialize)]
pub struct IterationStatistics {
    pub iteration_id: String,
    pub iteration_number: u64,
    pub mode: IterationMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub stats: IterationStats,
    pub comparison: Option<IterationComparison>,
}

type FingerprintMap = HashMap<String, DocumentFingerprint>;

/// Creates, tracks, and compares crawl iterations
pub struct IterationManager {
    storage_dir: PathBuf,
    iterations: Mutex<HashMap<String, IterationMetadata>>,
    fingerprints: Mutex<HashMap<String, FingerprintMap>>,
}

impl IterationManager {
    /// Opens an iteration store, loading metadata and fingerprints already
    /// on disk
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)?;

        let manager = Self {
            storage_dir,
            iterations: Mutex::new(HashMap::new()),
            fingerprints: Mutex::new(HashMap::new()),
        };
        manager.load_from_disk()?;
        Ok(manager)
    }

    /// Creates the next iteration for a crawl
    ///
    /// The iteration number is the count of existing iterations; the parent
    /// is the most recent iteration and the baseline is iteration 0
    /// (absent for the baseline itself).
    pub fn create_iteration(
        &self,
        crawl_id: &str,
        config: serde_json::Value,
        mode: IterationMode,
    ) -> Result<String> {
        let mut iterations = self.iterations.lock().expect("iteration index poisoned");

        let existing = Self::sorted_for_crawl(&iterations, crawl_id);
        let iteration_number = existing.len() as u64;
        let iteration_id = format!("{}_iter_{}", crawl_id, iteration_number);

        let (parent, baseline) = match existing.as_slice() {
            [] => (None, None),
            list => (
                Some(list[list.len() - 1].iteration_id.clone()),
                Some(list[0].iteration_id.clone()),
            ),
        };

        let iteration_dir = self.storage_dir.join(&iteration_id);
        fs::create_dir_all(&iteration_dir)?;

        let metadata = IterationMetadata {
            iteration_id: iteration_id.clone(),
            crawl_id: crawl_id.to_string(),
            iteration_number,
            parent_iteration_id: parent,
            baseline_iteration_id: baseline,
            mode,
            started_at: Utc::now(),
            completed_at: None,
            config,
            stats: IterationStats::default(),
            fingerprints_file: iteration_dir.join("fingerprints.json"),
        };

        self.save_metadata(&metadata)?;
        iterations.insert(iteration_id.clone(), metadata);
        self.fingerprints
            .lock()
            .expect("fingerprint store poisoned")
            .insert(iteration_id.clone(), HashMap::new());

        Ok(iteration_id)
    }

    pub fn get_iteration(&self, iteration_id: &str) -> Option<IterationMetadata> {
        self.iterations
            .lock()
            .expect("iteration index poisoned")
            .get(iteration_id)
            .cloned()
    }

    /// All iterations for a crawl, ascending by iteration number
    pub fn iterations_for_crawl(&self, crawl_id: &str) -> Vec<IterationMetadata> {
        let iterations = self.iterations.lock().expect("iteration index poisoned");
        Self::sorted_for_crawl(&iterations, crawl_id)
    }

    /// Decides whether a URL must be fetched in this iteration
    ///
    /// Baseline and full modes always fetch. Incremental mode consults the
    /// parent iteration's fingerprint: a matching ETag or Last-Modified
    /// means the body fetch can be skipped (`Unchanged`); a mismatch means
    /// `Modified`. With no validation headers the document must be fetched
    /// and hashed before a final classification, so it is treated as
    /// `Modified` pending confirmation.
    pub fn should_crawl(
        &self,
        iteration_id: &str,
        url: &str,
        current_etag: Option<&str>,
        current_last_modified: Option<&str>,
    ) -> (bool, Option<ChangeType>) {
        let metadata = match self.get_iteration(iteration_id) {
            Some(m) => m,
            None => return (true, None),
        };

        match metadata.mode {
            IterationMode::Baseline | IterationMode::Full => (true, Some(ChangeType::New)),
            IterationMode::Incremental => {
                let parent_id = match metadata.parent_iteration_id {
                    Some(id) => id,
                    // No parent: behaves like a baseline.
                    None => return (true, Some(ChangeType::New)),
                };

                let fingerprints = self.fingerprints.lock().expect("fingerprint store poisoned");
                let parent_fp = fingerprints.get(&parent_id).and_then(|map| map.get(url));

                let parent_fp = match parent_fp {
                    Some(fp) => fp,
                    None => return (true, Some(ChangeType::New)),
                };

                if let (Some(current), Some(previous)) = (current_etag, parent_fp.etag.as_deref())
                {
                    return if current == previous {
                        (false, Some(ChangeType::Unchanged))
                    } else {
                        (true, Some(ChangeType::Modified))
                    };
                }

                if let (Some(current), Some(previous)) =
                    (current_last_modified, parent_fp.last_modified.as_deref())
                {
                    return if current == previous {
                        (false, Some(ChangeType::Unchanged))
                    } else {
                        (true, Some(ChangeType::Modified))
                    };
                }

                (true, Some(ChangeType::Modified))
            }
        }
    }

    /// Records a document fingerprint within an iteration
    pub fn record(
        &self,
        iteration_id: &str,
        url: &str,
        content: &[u8],
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<DocumentFingerprint> {
        if self.get_iteration(iteration_id).is_none() {
            return Err(EngineError::IterationNotFound(iteration_id.to_string()));
        }

        let fingerprint = DocumentFingerprint {
            url: url.to_string(),
            content_hash: hex::encode(Sha256::digest(content)),
            etag: etag.map(String::from),
            last_modified: last_modified.map(String::from),
            file_size: content.len() as u64,
            captured_at: Utc::now(),
        };

        self.fingerprints
            .lock()
            .expect("fingerprint store poisoned")
            .entry(iteration_id.to_string())
            .or_default()
            .insert(url.to_string(), fingerprint.clone());

        Ok(fingerprint)
    }

    /// Classifies a fetched document against the parent iteration by
    /// content hash
    pub fn detect_change(&self, iteration_id: &str, url: &str, content: &[u8]) -> ChangeType {
        let parent_id = match self
            .get_iteration(iteration_id)
            .and_then(|m| m.parent_iteration_id)
        {
            Some(id) => id,
            None => return ChangeType::New,
        };

        let fingerprints = self.fingerprints.lock().expect("fingerprint store poisoned");
        let parent_fp = match fingerprints.get(&parent_id).and_then(|map| map.get(url)) {
            Some(fp) => fp,
            None => return ChangeType::New,
        };

        if hex::encode(Sha256::digest(content)) == parent_fp.content_hash {
            ChangeType::Unchanged
        } else {
            ChangeType::Modified
        }
    }

    /// Compares two iterations: URL set difference for new/deleted, hash
    /// equality for unchanged/modified
    pub fn compare(
        &self,
        baseline_iteration_id: &str,
        current_iteration_id: &str,
    ) -> IterationComparison {
        let fingerprints = self.fingerprints.lock().expect("fingerprint store poisoned");
        let empty = FingerprintMap::new();
        let baseline = fingerprints.get(baseline_iteration_id).unwrap_or(&empty);
        let current = fingerprints.get(current_iteration_id).unwrap_or(&empty);

        let mut comparison = IterationComparison {
            baseline_iteration_id: baseline_iteration_id.to_string(),
            current_iteration_id: current_iteration_id.to_string(),
            ..IterationComparison::default()
        };

        for (url, current_fp) in current {
            match baseline.get(url) {
                None => comparison.new_documents.push(url.clone()),
                Some(baseline_fp) => {
                    if baseline_fp.content_hash == current_fp.content_hash {
                        comparison.unchanged_documents.push(url.clone());
                    } else {
                        comparison.modified_documents.push(url.clone());
                    }
                }
            }
        }

        for url in baseline.keys() {
            if !current.contains_key(url) {
                comparison.deleted_documents.push(url.clone());
            }
        }

        comparison.new_documents.sort();
        comparison.modified_documents.sort();
        comparison.unchanged_documents.sort();
        comparison.deleted_documents.sort();

        comparison
    }

    /// Marks an iteration complete and persists fingerprints and metadata
    pub fn complete(&self, iteration_id: &str, stats: IterationStats) -> Result<()> {
        let metadata = {
            let mut iterations = self.iterations.lock().expect("iteration index poisoned");
            let metadata = iterations
                .get_mut(iteration_id)
                .ok_or_else(|| EngineError::IterationNotFound(iteration_id.to_string()))?;
            metadata.completed_at = Some(Utc::now());
            metadata.stats = stats;
            metadata.clone()
        };

        self.save_fingerprints(iteration_id, &metadata.fingerprints_file)?;
        self.save_metadata(&metadata)?;
        Ok(())
    }

    /// Walks the parent chain from the baseline to the given iteration
    pub fn iteration_chain(&self, iteration_id: &str) -> Vec<IterationMetadata> {
        let iterations = self.iterations.lock().expect("iteration index poisoned");
        let mut chain = Vec::new();
        let mut current = iterations.get(iteration_id).cloned();

        while let Some(metadata) = current {
            let parent = metadata
                .parent_iteration_id
                .as_ref()
                .and_then(|id| iterations.get(id).cloned());
            chain.insert(0, metadata);
            current = parent;
        }

        chain
    }

    /// Summary for an iteration, including the diff against its parent
    /// once completed
    pub fn statistics(&self, iteration_id: &str) -> Option<IterationStatistics> {
        let metadata = self.get_iteration(iteration_id)?;

        let comparison = match (&metadata.parent_iteration_id, metadata.completed_at) {
            (Some(parent_id), Some(_)) => Some(self.compare(parent_id, iteration_id)),
            _ => None,
        };

        Some(IterationStatistics {
            iteration_id: metadata.iteration_id.clone(),
            iteration_number: metadata.iteration_number,
            mode: metadata.mode,
            started_at: metadata.started_at,
            completed_at: metadata.completed_at,
            duration_seconds: metadata.duration_seconds(),
            stats: metadata.stats.clone(),
            comparison,
        })
    }

    fn sorted_for_crawl(
        iterations: &HashMap<String, IterationMetadata>,
        crawl_id: &str,
    ) -> Vec<IterationMetadata> {
        let mut list: Vec<IterationMetadata> = iterations
            .values()
            .filter(|m| m.crawl_id == crawl_id)
            .cloned()
            .collect();
        list.sort_by_key(|m| m.iteration_number);
        list
    }

    fn save_metadata(&self, metadata: &IterationMetadata) -> Result<()> {
        let path = self
            .storage_dir
            .join(format!("{}_metadata.json", metadata.iteration_id));
        write_atomic(&path, &serde_json::to_vec_pretty(metadata)?)?;
        Ok(())
    }

    /// Writes the iteration's fingerprint file: one JSON document mapping
    /// url to fingerprint
    fn save_fingerprints(&self, iteration_id: &str, path: &Path) -> Result<()> {
        let fingerprints = self.fingerprints.lock().expect("fingerprint store poisoned");
        // BTreeMap for a stable file layout.
        let map: BTreeMap<&String, &DocumentFingerprint> = fingerprints
            .get(iteration_id)
            .map(|m| m.iter().collect())
            .unwrap_or_default();
        write_atomic(path, &serde_json::to_vec_pretty(&map)?)?;
        Ok(())
    }

    fn load_from_disk(&self) -> Result<()> {
        let mut iterations = self.iterations.lock().expect("iteration index poisoned");
        let mut fingerprints = self.fingerprints.lock().expect("fingerprint store poisoned");

        for entry in fs::read_dir(&self.storage_dir)? {
            let path = entry?.path();
            let is_metadata = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with("_metadata.json"))
                .unwrap_or(false);
            if !is_metadata {
                continue;
            }

            let metadata: IterationMetadata = match fs::read(&path)
                .map_err(EngineError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(EngineError::from))
            {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Skipping unreadable iteration metadata {:?}: {}", path, e);
                    continue;
                }
            };

            if metadata.fingerprints_file.exists() {
                match fs::read(&metadata.fingerprints_file)
                    .map_err(EngineError::from)
                    .and_then(|bytes| {
                        serde_json::from_slice::<FingerprintMap>(&bytes).map_err(EngineError::from)
                    }) {
                    Ok(map) => {
                        fingerprints.insert(metadata.iteration_id.clone(), map);
                    }
                    Err(e) => tracing::warn!(
                        "Skipping unreadable fingerprints for {}: {}",
                        metadata.iteration_id,
                        e
                    ),
                }
            }

            iterations.insert(metadata.iteration_id.clone(), metadata);
        }

        Ok(())
    }
}
