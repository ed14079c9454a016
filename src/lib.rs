//! GenCrawl: a resumable crawl orchestration engine
//!
//! This crate drives long-running, resumable web-crawl jobs: it discovers
//! candidate documents politely (robots.txt, sitemaps, per-host rate limits),
//! tracks each job through a multi-stage lifecycle with cooperative
//! pause/cancel, snapshots job state into durable checkpoints, fingerprints
//! documents across repeated crawls to classify changes, and fans out
//! structured progress events to observers.

pub mod checkpoint;
pub mod config;
pub mod discovery;
pub mod events;
mod fsutil;
pub mod iteration;
pub mod manager;
pub mod state;
pub mod storage;

use state::{JobState, JobSubstate};
use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Invalid substate {substate} for state {state}")]
    InvalidSubstate {
        state: JobState,
        substate: JobSubstate,
    },

    #[error("Crawl job not found: {0}")]
    JobNotFound(String),

    #[error("Iteration not found: {0}")]
    IterationNotFound(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{CrawlConfig, EngineSettings};
pub use events::{CrawlEvent, EventBus, EventType};
pub use manager::CrawlManager;
pub use state::{JobData, StateTransition};
