use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-job crawl configuration
///
/// This is the boundary contract with the query-interpretation collaborator:
/// it deserializes from the JSON shape that collaborator produces and from
/// TOML job files on the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Base URLs/domains to crawl
    #[serde(default)]
    pub targets: Vec<String>,

    /// Discovery strategy
    #[serde(default)]
    pub strategy: CrawlStrategy,

    /// Downstream crawler type (consumed by the excluded extraction layer)
    #[serde(default)]
    pub crawler: CrawlerKind,

    #[serde(default)]
    pub filters: FilterConfig,

    #[serde(default)]
    pub limits: DiscoveryLimits,

    #[serde(default)]
    pub taxonomy: TaxonomyConfig,

    /// Honor robots.txt rules (domain profiles may override per host)
    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,

    /// Skip page scanning when sitemaps already yield enough candidates
    #[serde(default = "default_true")]
    pub prefer_sitemaps: bool,

    /// Restrict discovery to sitemap-derived candidates
    #[serde(default)]
    pub sitemap_only: bool,

    /// Politeness mode tightens page-scan caps; unset means on
    #[serde(default)]
    pub polite_mode: Option<bool>,

    /// Per-host overrides: path allow/deny lists, robots opt-out, delays
    #[serde(default)]
    pub domain_profiles: BTreeMap<String, DomainProfile>,
}

impl CrawlConfig {
    /// Effective politeness (defaults to on)
    pub fn polite(&self) -> bool {
        self.polite_mode.unwrap_or(true)
    }

    /// Profile for a host, or an empty default
    pub fn profile_for(&self, host: &str) -> DomainProfile {
        self.domain_profiles.get(host).cloned().unwrap_or_default()
    }
}

/// Discovery strategy requested by the configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlStrategy {
    #[default]
    Recursive,
    Sitemap,
    SearchBased,
    Api,
    Focused,
}

/// Downstream crawler requested by the configuration
///
/// The engine only records this; the extraction pipeline that consumes it
/// is an external collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlerKind {
    #[default]
    Scrapy,
    Crawl4ai,
    Playwright,
    Custom,
}

/// Candidate filters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// File extensions to collect (e.g. "pdf", "docx")
    #[serde(default)]
    pub file_types: Vec<String>,

    /// Keywords used for page ranking and subject matching
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Explicit document-type allowlist (overrides keyword inference)
    #[serde(default)]
    pub document_types: Vec<String>,

    /// Explicit document-type denylist
    #[serde(default)]
    pub exclude_document_types: Vec<String>,

    /// MIME-type overrides for WordPress media discovery
    #[serde(default)]
    pub wp_media_mime_types: Vec<String>,
}

/// Numeric limits bounding every discovery step
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiscoveryLimits {
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,

    #[serde(default = "default_max_sitemaps")]
    pub max_sitemaps: usize,

    #[serde(default = "default_max_sitemap_urls")]
    pub max_sitemap_urls: usize,

    #[serde(default = "default_max_page_scans")]
    pub max_page_scans: usize,

    #[serde(default = "default_max_seed_pages")]
    pub max_seed_pages: usize,

    #[serde(default = "default_max_wp_media_pages")]
    pub max_wp_media_pages: usize,

    #[serde(default = "default_max_wp_media_items")]
    pub max_wp_media_items: usize,

    /// Per-domain fairness cap; unset falls back to `max_documents`
    #[serde(default)]
    pub max_documents_per_domain: Option<usize>,
}

impl DiscoveryLimits {
    /// Effective per-domain cap
    pub fn per_domain(&self) -> usize {
        self.max_documents_per_domain.unwrap_or(self.max_documents)
    }
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            max_documents: default_max_documents(),
            max_sitemaps: default_max_sitemaps(),
            max_sitemap_urls: default_max_sitemap_urls(),
            max_page_scans: default_max_page_scans(),
            max_seed_pages: default_max_seed_pages(),
            max_wp_media_pages: default_max_wp_media_pages(),
            max_wp_media_items: default_max_wp_media_items(),
            max_documents_per_domain: None,
        }
    }
}

/// Taxonomy pass-through from the query interpreter
///
/// Hints are the one genuinely open-ended payload in the system, so they
/// stay a key-value bag; everything that consumes them reads typed values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    #[serde(default)]
    pub hints: BTreeMap<String, serde_json::Value>,
}

impl TaxonomyConfig {
    fn string_hint(&self, key: &str) -> Option<String> {
        self.hints
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn subject(&self) -> Option<String> {
        self.string_hint("subject")
    }

    pub fn program(&self) -> Option<String> {
        self.string_hint("program")
    }

    pub fn document_type(&self) -> Option<String> {
        self.string_hint("document_type")
    }
}

/// Per-host crawling profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainProfile {
    /// Path prefixes that candidates must match (empty means all paths)
    #[serde(default)]
    pub allow_paths: Vec<String>,

    /// Path prefixes that are always rejected
    #[serde(default)]
    pub disallow_paths: Vec<String>,

    /// Overrides the job-level robots setting for this host
    #[serde(default)]
    pub respect_robots: Option<bool>,

    /// Minimum seconds between requests to this host
    #[serde(default)]
    pub crawl_delay: Option<f64>,
}

impl DomainProfile {
    /// Checks the profile's path allow/deny lists against a URL path
    pub fn path_allowed(&self, path: &str) -> bool {
        let path = if path.is_empty() { "/" } else { path };
        if !self.allow_paths.is_empty() && !self.allow_paths.iter().any(|p| path.starts_with(p)) {
            return false;
        }
        !self.disallow_paths.iter().any(|p| path.starts_with(p))
    }
}

/// User agent identification, sent with every outbound request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgentConfig {
    #[serde(default = "default_crawler_name")]
    pub crawler_name: String,

    #[serde(default = "default_crawler_version")]
    pub crawler_version: String,

    #[serde(default = "default_contact_url")]
    pub contact_url: String,
}

impl UserAgentConfig {
    /// Full user agent string: `Name/Version (+ContactURL)`
    pub fn as_header(&self) -> String {
        format!(
            "{}/{} (+{})",
            self.crawler_name, self.crawler_version, self.contact_url
        )
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: default_crawler_name(),
            crawler_version: default_crawler_version(),
            contact_url: default_contact_url(),
        }
    }
}

/// Process-level engine settings, constructed once and injected everywhere
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Root directory for all durable state
    pub data_dir: PathBuf,

    #[serde(default)]
    pub user_agent: UserAgentConfig,

    /// Create an automatic checkpoint every N processed documents
    #[serde(default = "default_auto_checkpoint_interval")]
    pub auto_checkpoint_interval: u64,

    /// Checkpoints retained per job when pruning
    #[serde(default = "default_checkpoint_keep_last")]
    pub checkpoint_keep_last: usize,

    /// Global per-job event ring buffer size
    #[serde(default = "default_event_history_limit")]
    pub event_history_limit: usize,

    /// Per-request timeout in seconds for discovery HTTP operations
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Page-scan cap applied in politeness mode
    #[serde(default = "default_polite_max_page_scans")]
    pub polite_max_page_scans: usize,

    /// Seed-page cap applied in politeness mode
    #[serde(default = "default_polite_max_seed_pages")]
    pub polite_max_seed_pages: usize,
}

impl EngineSettings {
    /// Settings rooted at a data directory, everything else defaulted
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            user_agent: UserAgentConfig::default(),
            auto_checkpoint_interval: default_auto_checkpoint_interval(),
            checkpoint_keep_last: default_checkpoint_keep_last(),
            event_history_limit: default_event_history_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            polite_max_page_scans: default_polite_max_page_scans(),
            polite_max_seed_pages: default_polite_max_seed_pages(),
        }
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn iterations_dir(&self) -> PathBuf {
        self.data_dir.join("iterations")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    pub fn url_cache_path(&self) -> PathBuf {
        self.data_dir.join("cache").join("url_status.json")
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.data_dir.join("jobs.db")
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::with_data_dir(Path::new("./data"))
    }
}

fn default_true() -> bool {
    true
}

fn default_max_documents() -> usize {
    50
}

fn default_max_sitemaps() -> usize {
    6
}

fn default_max_sitemap_urls() -> usize {
    500
}

fn default_max_page_scans() -> usize {
    25
}

fn default_max_seed_pages() -> usize {
    5
}

fn default_max_wp_media_pages() -> usize {
    2
}

fn default_max_wp_media_items() -> usize {
    200
}

fn default_crawler_name() -> String {
    "GenCrawl".to_string()
}

fn default_crawler_version() -> String {
    "1.0".to_string()
}

fn default_contact_url() -> String {
    "https://gencrawl.local".to_string()
}

fn default_auto_checkpoint_interval() -> u64 {
    100
}

fn default_checkpoint_keep_last() -> usize {
    3
}

fn default_event_history_limit() -> usize {
    1000
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_polite_max_page_scans() -> usize {
    10
}

fn default_polite_max_seed_pages() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserializes_from_boundary_json() {
        let json = r#"{
            "targets": ["https://example.org"],
            "strategy": "sitemap",
            "crawler": "crawl4ai",
            "filters": {
                "file_types": ["pdf"],
                "keywords": ["mathematics", "syllabus"]
            },
            "limits": {"max_documents": 5},
            "taxonomy": {"hints": {"subject": "Mathematics", "program": "CSEC"}},
            "respect_robots_txt": true
        }"#;

        let config: CrawlConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.targets, vec!["https://example.org"]);
        assert_eq!(config.strategy, CrawlStrategy::Sitemap);
        assert_eq!(config.crawler, CrawlerKind::Crawl4ai);
        assert_eq!(config.limits.max_documents, 5);
        // Unspecified limits keep their defaults.
        assert_eq!(config.limits.max_sitemaps, 6);
        assert_eq!(config.limits.per_domain(), 5);
        assert_eq!(config.taxonomy.subject().as_deref(), Some("Mathematics"));
        assert_eq!(config.taxonomy.program().as_deref(), Some("CSEC"));
        assert!(config.respect_robots_txt);
        assert!(config.polite());
    }

    #[test]
    fn test_domain_profile_paths() {
        let profile = DomainProfile {
            allow_paths: vec!["/docs".into(), "/uploads".into()],
            disallow_paths: vec!["/docs/private".into()],
            ..DomainProfile::default()
        };

        assert!(profile.path_allowed("/docs/a.pdf"));
        assert!(profile.path_allowed("/uploads/b.pdf"));
        assert!(!profile.path_allowed("/other/c.pdf"));
        assert!(!profile.path_allowed("/docs/private/d.pdf"));

        let open = DomainProfile::default();
        assert!(open.path_allowed("/anything"));
        assert!(open.path_allowed(""));
    }

    #[test]
    fn test_user_agent_header() {
        let ua = UserAgentConfig::default();
        assert_eq!(ua.as_header(), "GenCrawl/1.0 (+https://gencrawl.local)");
    }

    #[test]
    fn test_settings_paths() {
        let settings = EngineSettings::with_data_dir("/tmp/gc");
        assert_eq!(
            settings.checkpoints_dir(),
            PathBuf::from("/tmp/gc/checkpoints")
        );
        assert_eq!(
            settings.url_cache_path(),
            PathBuf::from("/tmp/gc/cache/url_status.json")
        );
        assert_eq!(settings.auto_checkpoint_interval, 100);
    }
}
