//! Configuration module for GenCrawl
//!
//! Two configuration layers live here:
//!
//! - `CrawlConfig`: the per-job crawl configuration handed in by the query
//!   interpretation collaborator (targets, filters, limits, taxonomy hints,
//!   domain profiles)
//! - `EngineSettings`: process-level settings (data directories, user agent
//!   identity, checkpoint cadence) wired in once at startup

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CrawlConfig, CrawlStrategy, CrawlerKind, DiscoveryLimits, DomainProfile, EngineSettings,
    FilterConfig, TaxonomyConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_crawl_config, load_crawl_config_with_hash};

// Re-export validation
pub use validation::validate;
