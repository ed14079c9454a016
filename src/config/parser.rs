use crate::config::types::CrawlConfig;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and validates a crawl configuration file
///
/// Files ending in `.json` are parsed as the boundary JSON shape the query
/// interpreter produces; anything else is parsed as TOML.
pub fn load_crawl_config(path: &Path) -> Result<CrawlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let config: CrawlConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
        serde_json::from_str(&content)?
    } else {
        toml::from_str(&content)?
    };

    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Used to detect whether the configuration changed between runs of the
/// same logical crawl.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_crawl_config_with_hash(path: &Path) -> Result<(CrawlConfig, String), ConfigError> {
    let config = load_crawl_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
