//! URL validation cache
//!
//! Maps a URL to its last preflight probe result (status, content type,
//! response metadata) with a seven-day TTL, expired lazily on read. The
//! cache is one JSON document on disk, written atomically so concurrent
//! jobs sharing the file never see a torn write.

use crate::fsutil::write_atomic;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Cache entry time-to-live: 7 days
const CACHE_TTL_HOURS: i64 = 7 * 24;

/// Response metadata captured by a preflight probe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationMeta {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<String>,
    pub final_url: Option<String>,
}

/// One cached probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
    pub meta: ValidationMeta,
}

impl CacheEntry {
    /// Whether the entry is still inside the TTL window
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp < Duration::hours(CACHE_TTL_HOURS)
    }
}

/// Disk-backed URL probe cache
pub struct UrlValidationCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl UrlValidationCache {
    /// Opens the cache file; a missing or corrupt file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("URL cache {:?} is corrupt, starting empty: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Returns a cached entry if present and inside the TTL window
    pub fn get_fresh(&self, url: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().expect("url cache poisoned");
        entries
            .get(url)
            .filter(|entry| entry.is_fresh(Utc::now()))
            .cloned()
    }

    /// Stores a probe result
    pub fn insert(&self, url: &str, entry: CacheEntry) {
        self.entries
            .lock()
            .expect("url cache poisoned")
            .insert(url.to_string(), entry);
    }

    /// Persists the cache to disk atomically
    pub fn save(&self) -> std::io::Result<()> {
        let bytes = {
            let entries = self.entries.lock().expect("url cache poisoned");
            serde_json::to_vec_pretty(&*entries)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
        };
        write_atomic(&self.path, &bytes)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("url cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
