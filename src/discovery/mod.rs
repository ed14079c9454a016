//! Discovery Engine
//!
//! Turns a crawl configuration into a validated, deduplicated,
//! taxonomy-filtered set of document candidates. The pipeline, each step
//! bounded by its configured limit:
//!
//! 1. robots.txt resolution per target host
//! 2. sitemap traversal (robots-declared sitemaps, else well-known probes,
//!    expanding sitemap indexes one level)
//! 3. WordPress media discovery (additive)
//! 4. page-scan fallback when sitemaps come up short
//! 5. preflight validation through the TTL'd URL cache
//! 6. taxonomy filtering (subject/program/document-type)
//! 7. per-domain fairness caps
//!
//! All requests are paced per host; per-URL and per-host failures are
//! isolated and never abort the pass.

mod cache;
mod filter;
mod requestor;
mod robots;
mod scan;
mod sitemap;
mod wp_media;

pub use cache::{CacheEntry, UrlValidationCache, ValidationMeta};
pub use requestor::{build_discovery_client, host_of, HostRequestor};
pub use robots::RobotsPolicy;

use crate::config::{CrawlConfig, CrawlStrategy, EngineSettings};
use crate::manager::JobControl;
use crate::Result;
use filter::{
    doc_type_allowlist_from_keywords, document_type_from_context, extract_date, keyword_value,
    matches_file_types, matches_keywords, matches_program, matches_subject, normalize_doc_types,
    program_terms, subject_terms, title_from_url,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use url::Url;

/// A document discovered but not yet fetched or ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCandidate {
    pub url: String,
    pub title: String,
    pub file_type: String,
    pub file_size: u64,
    pub document_type: String,
    pub source_date: Option<String>,
    /// Page that linked to this document, when known
    pub source_page: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
}

/// Result of one discovery pass
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub documents: Vec<DocumentCandidate>,
    pub checked_urls: u64,
    pub skipped_urls: u64,
    pub used_sitemaps: Vec<String>,
}

/// Politeness-aware candidate discovery
pub struct DiscoveryEngine {
    requestor: HostRequestor,
    cache: UrlValidationCache,
    user_agent: String,
    polite_max_page_scans: usize,
    polite_max_seed_pages: usize,
}

impl DiscoveryEngine {
    /// Builds the engine from process settings
    pub fn new(settings: &EngineSettings) -> Result<Self> {
        let client = build_discovery_client(settings)?;
        Ok(Self {
            requestor: HostRequestor::new(client),
            cache: UrlValidationCache::open(settings.url_cache_path()),
            user_agent: settings.user_agent.as_header(),
            polite_max_page_scans: settings.polite_max_page_scans,
            polite_max_seed_pages: settings.polite_max_seed_pages,
        })
    }

    /// Runs one discovery pass for a configuration
    ///
    /// The control token is polled between URLs; on cancellation the pass
    /// stops and returns whatever it found so far (the manager converts the
    /// cancel into the job-level transition).
    pub async fn discover(
        &self,
        config: &CrawlConfig,
        control: &JobControl,
    ) -> Result<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome::default();
        if config.targets.is_empty() {
            return Ok(outcome);
        }

        let limits = config.limits;
        let (max_page_scans, max_seed_pages) = if config.polite() {
            (
                limits.max_page_scans.min(self.polite_max_page_scans),
                limits.max_seed_pages.min(self.polite_max_seed_pages),
            )
        } else {
            (limits.max_page_scans, limits.max_seed_pages)
        };

        let filters = &config.filters;
        let file_types = &filters.file_types;
        let explicit_block = normalize_doc_types(&filters.exclude_document_types);
        let explicit_allow = normalize_doc_types(&filters.document_types);
        let doc_type_allowlist = if explicit_allow.is_empty() {
            doc_type_allowlist_from_keywords(&filters.keywords)
        } else {
            explicit_allow
        };
        let subjects = subject_terms(filters, config);
        let programs = program_terms(filters, config);
        let sitemap_only = config.sitemap_only || config.strategy == CrawlStrategy::Sitemap;

        for (host, profile) in &config.domain_profiles {
            if let Some(delay) = profile.crawl_delay {
                self.requestor.set_delay(host, delay);
            }
        }

        let mut robots_by_host: HashMap<String, RobotsPolicy> = HashMap::new();
        let mut candidates: BTreeSet<String> = BTreeSet::new();
        let mut sitemap_lastmod: HashMap<String, String> = HashMap::new();
        let mut wp_meta: HashMap<String, wp_media::WpMediaItem> = HashMap::new();
        let mut link_sources: BTreeMap<String, String> = BTreeMap::new();

        // Steps 1 + 2: robots resolution and sitemap traversal per host.
        for target in &config.targets {
            if control.checkpoint().await.is_err() {
                return self.finish(outcome);
            }

            let host = match host_of(target) {
                Some(host) => host,
                None => continue,
            };
            if robots_by_host.contains_key(&host) {
                continue;
            }

            let profile = config.profile_for(&host);
            let policy = if profile.respect_robots == Some(false) {
                RobotsPolicy::allow_all()
            } else {
                robots::fetch_robots(&self.requestor, target).await
            };

            // The stricter of profile delay and robots crawl-delay wins;
            // an explicit profile delay is authoritative.
            if profile.crawl_delay.is_none() {
                if let Some(delay) = policy.crawl_delay {
                    self.requestor.set_delay(&host, delay);
                }
            }

            let sitemaps = if policy.sitemaps.is_empty() {
                well_known_sitemaps(target)
            } else {
                policy.sitemaps.clone()
            };
            robots_by_host.insert(host, policy);

            for sitemap_url in sitemaps.iter().take(limits.max_sitemaps) {
                if control.checkpoint().await.is_err() {
                    return self.finish(outcome);
                }

                let (entries, is_index) =
                    sitemap::fetch_sitemap(&self.requestor, sitemap_url, limits.max_sitemap_urls)
                        .await;
                if entries.is_empty() {
                    continue;
                }

                if is_index {
                    for nested in entries.iter().take(limits.max_sitemaps) {
                        let (nested_entries, _) = sitemap::fetch_sitemap(
                            &self.requestor,
                            &nested.loc,
                            limits.max_sitemap_urls,
                        )
                        .await;
                        collect_sitemap_entries(
                            config,
                            &nested_entries,
                            &mut candidates,
                            &mut sitemap_lastmod,
                        );
                        outcome.used_sitemaps.push(nested.loc.clone());
                    }
                } else {
                    collect_sitemap_entries(
                        config,
                        &entries,
                        &mut candidates,
                        &mut sitemap_lastmod,
                    );
                    outcome.used_sitemaps.push(sitemap_url.clone());
                }
            }
        }

        // Step 3: WordPress media discovery, additive per host.
        let wp_mimes = wp_media::wp_mime_types(file_types, &filters.wp_media_mime_types);
        let mut wp_checked_hosts: HashSet<String> = HashSet::new();
        for target in &config.targets {
            if control.checkpoint().await.is_err() {
                return self.finish(outcome);
            }

            let host = match host_of(target) {
                Some(host) => host,
                None => continue,
            };
            if !wp_checked_hosts.insert(host.clone()) {
                continue;
            }

            let profile = config.profile_for(&host);
            let should_respect = profile.respect_robots.unwrap_or(config.respect_robots_txt);
            if should_respect {
                if let Some(robots) = robots_by_host.get(&host) {
                    let probe = format!("https://{}/wp-json/wp/v2/media", host);
                    if !robots.allows(&probe, &self.user_agent) {
                        continue;
                    }
                }
            }

            let items = wp_media::fetch_wp_media(
                &self.requestor,
                target,
                limits.max_wp_media_pages,
                limits.max_wp_media_items,
                &wp_mimes,
            )
            .await;
            for item in items {
                if !path_allowed(config, &item.url) {
                    continue;
                }
                candidates.insert(item.url.clone());
                wp_meta.insert(item.url.clone(), item);
            }
        }

        // Partition candidates into file URLs and scannable pages.
        let mut file_candidates: BTreeSet<String> = BTreeSet::new();
        let mut page_candidates: Vec<String> = Vec::new();
        for url in &candidates {
            if is_file_url(url, file_types) {
                file_candidates.insert(url.clone());
            } else if matches_keywords(&keyword_value(url), &filters.keywords) {
                page_candidates.push(url.clone());
            }
        }

        // Step 4: page-scan fallback when sitemap files are insufficient.
        let mut should_scan_pages = !sitemap_only;
        if config.prefer_sitemaps && file_candidates.len() >= limits.max_documents {
            should_scan_pages = false;
        }

        if should_scan_pages {
            let ranked = scan::rank_pages_by_keywords(&page_candidates, &filters.keywords);
            let mut seeds: Vec<String> = Vec::new();
            for page in config
                .targets
                .iter()
                .take(max_seed_pages)
                .chain(ranked.iter())
            {
                if !seeds.contains(page) {
                    seeds.push(page.clone());
                }
            }
            seeds.truncate(max_page_scans);

            for seed in &seeds {
                if control.checkpoint().await.is_err() {
                    return self.finish(outcome);
                }
                if !path_allowed(config, seed) {
                    continue;
                }

                let response = match self.requestor.get(seed).await {
                    Ok(response) if response.status().is_success() => response,
                    Ok(_) | Err(_) => continue,
                };
                let base = match Url::parse(response.url().as_str()) {
                    Ok(url) => url,
                    Err(_) => continue,
                };
                let body = match response.text().await {
                    Ok(body) => body,
                    Err(_) => continue,
                };

                for link in scan::extract_links(&body, &base) {
                    if !path_allowed(config, &link) {
                        continue;
                    }
                    if is_file_url(&link, file_types) {
                        link_sources.entry(link.clone()).or_insert(seed.clone());
                        file_candidates.insert(link);
                    }
                }
            }
        }

        // Steps 5-7: preflight validation, taxonomy filter, fairness caps.
        let per_domain_limit = limits.per_domain();
        let mut per_domain_counts: HashMap<String, usize> = HashMap::new();

        for url in &file_candidates {
            if outcome.documents.len() >= limits.max_documents {
                break;
            }
            if control.checkpoint().await.is_err() {
                return self.finish(outcome);
            }

            let host = match host_of(url) {
                Some(host) => host,
                None => continue,
            };

            if per_domain_counts.get(&host).copied().unwrap_or(0) >= per_domain_limit {
                outcome.skipped_urls += 1;
                continue;
            }

            let profile = config.profile_for(&host);
            let should_respect = profile.respect_robots.unwrap_or(config.respect_robots_txt);
            if should_respect {
                if let Some(robots) = robots_by_host.get(&host) {
                    if !robots.allows(url, &self.user_agent) {
                        outcome.skipped_urls += 1;
                        continue;
                    }
                }
            }

            outcome.checked_urls += 1;
            let meta = match self.preflight(url, file_types).await {
                Some(meta) => meta,
                None => {
                    outcome.skipped_urls += 1;
                    continue;
                }
            };

            let title = title_from_url(url);
            if !matches_subject(url, &title, &subjects, &programs)
                || !matches_program(url, &title, &programs)
            {
                outcome.skipped_urls += 1;
                continue;
            }

            let doc_type = document_type_from_context(url, link_sources.get(url).map(|s| s.as_str()));
            if !doc_type_allowlist.is_empty() && !doc_type_allowlist.contains(&doc_type) {
                outcome.skipped_urls += 1;
                continue;
            }
            if explicit_block.contains(&doc_type) {
                outcome.skipped_urls += 1;
                continue;
            }

            let wp_item = wp_meta.get(url);
            let source_date = sitemap_lastmod
                .get(url)
                .cloned()
                .or_else(|| {
                    wp_item
                        .and_then(|item| item.source_date.as_deref())
                        .and_then(extract_date)
                })
                .or_else(|| extract_date(url))
                .or_else(|| extract_date(&title));
            let source_page = link_sources
                .get(url)
                .cloned()
                .or_else(|| wp_item.and_then(|item| item.source_page.clone()));

            outcome.documents.push(DocumentCandidate {
                url: meta.final_url.clone().unwrap_or_else(|| url.clone()),
                title,
                file_type: file_types
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "pdf".to_string()),
                file_size: meta.content_length.unwrap_or(0),
                document_type: doc_type,
                source_date,
                source_page,
                content_type: meta.content_type.clone(),
                last_modified: meta.last_modified.clone(),
            });
            *per_domain_counts.entry(host).or_insert(0) += 1;
        }

        tracing::info!(
            "Discovery finished: {} documents, {} checked, {} skipped, {} sitemaps",
            outcome.documents.len(),
            outcome.checked_urls,
            outcome.skipped_urls,
            outcome.used_sitemaps.len()
        );

        self.finish(outcome)
    }

    /// Validates one candidate through the cache, probing with HEAD and
    /// falling back to a ranged GET when HEAD is refused
    async fn preflight(&self, url: &str, file_types: &[String]) -> Option<ValidationMeta> {
        if let Some(cached) = self.cache.get_fresh(url) {
            if cached.status >= 400 {
                return None;
            }
            if !matches_file_types(url, &cached.content_type, file_types) {
                return None;
            }
            return Some(cached.meta);
        }

        let response = match self.requestor.head(url).await {
            Ok(response)
                if matches!(response.status().as_u16(), 401 | 403 | 405) =>
            {
                match self.requestor.get_ranged(url).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::debug!("Ranged GET failed for {}: {}", url, e);
                        return None;
                    }
                }
            }
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("HEAD failed for {}: {}", url, e);
                return None;
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let meta = ValidationMeta {
            content_type: (!content_type.is_empty()).then(|| content_type.clone()),
            content_length: headers
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
            last_modified: headers
                .get(reqwest::header::LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            final_url: Some(response.url().to_string()),
        };

        self.cache.insert(
            url,
            CacheEntry {
                status,
                content_type: content_type.clone(),
                timestamp: chrono::Utc::now(),
                meta: meta.clone(),
            },
        );

        if !matches!(status, 200 | 206) {
            return None;
        }
        if !matches_file_types(url, &content_type, file_types) {
            return None;
        }

        Some(meta)
    }

    /// Persists the URL cache and returns the outcome; cache write failures
    /// are logged, never propagated
    fn finish(&self, outcome: DiscoveryOutcome) -> Result<DiscoveryOutcome> {
        if let Err(e) = self.cache.save() {
            tracing::warn!("Failed to persist URL validation cache: {}", e);
        }
        Ok(outcome)
    }
}

/// Well-known sitemap locations probed when robots.txt declares none
fn well_known_sitemaps(target: &str) -> Vec<String> {
    let base = target.trim_end_matches('/');
    vec![
        format!("{}/sitemap_index.xml", base),
        format!("{}/sitemap.xml", base),
    ]
}

/// Applies the per-host path allow/deny filter to a URL
fn path_allowed(config: &CrawlConfig, url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => config.profile_for(host).path_allowed(parsed.path()),
            None => false,
        },
        Err(_) => false,
    }
}

/// True when the URL's extension matches a requested file type
fn is_file_url(url: &str, file_types: &[String]) -> bool {
    let lowered = url.to_lowercase();
    file_types.iter().any(|ext| {
        let ext = ext.to_lowercase();
        let ext = ext.trim_start_matches('.');
        !ext.is_empty() && lowered.ends_with(&format!(".{}", ext))
    })
}

fn collect_sitemap_entries(
    config: &CrawlConfig,
    entries: &[sitemap::SitemapEntry],
    candidates: &mut BTreeSet<String>,
    sitemap_lastmod: &mut HashMap<String, String>,
) {
    for entry in entries {
        // The domain path filter applies at collection time, before any
        // budget is spent on the URL.
        if !path_allowed(config, &entry.loc) {
            continue;
        }
        candidates.insert(entry.loc.clone());
        if let Some(lastmod) = &entry.lastmod {
            sitemap_lastmod.insert(entry.loc.clone(), lastmod.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainProfile;

    #[test]
    fn test_is_file_url() {
        let file_types = vec!["pdf".to_string()];
        assert!(is_file_url("https://example.org/a.PDF", &file_types));
        assert!(!is_file_url("https://example.org/a.pdf.html", &file_types));
        assert!(!is_file_url("https://example.org/page", &file_types));
        assert!(!is_file_url("https://example.org/a.pdf", &[]));
    }

    #[test]
    fn test_well_known_sitemaps() {
        assert_eq!(
            well_known_sitemaps("https://example.org/"),
            vec![
                "https://example.org/sitemap_index.xml",
                "https://example.org/sitemap.xml"
            ]
        );
    }

    #[test]
    fn test_path_allowed_uses_domain_profile() {
        let mut config = CrawlConfig::default();
        config.domain_profiles.insert(
            "example.org".to_string(),
            DomainProfile {
                allow_paths: vec!["/uploads".to_string()],
                ..DomainProfile::default()
            },
        );

        assert!(path_allowed(&config, "https://example.org/uploads/a.pdf"));
        assert!(!path_allowed(&config, "https://example.org/private/a.pdf"));
        // Hosts without a profile are unrestricted.
        assert!(path_allowed(&config, "https://other.org/anything"));
        assert!(!path_allowed(&config, "not-a-url"));
    }

    #[test]
    fn test_document_candidate_serde_round_trip() {
        let candidate = DocumentCandidate {
            url: "https://example.org/a.pdf".to_string(),
            title: "A".to_string(),
            file_type: "pdf".to_string(),
            file_size: 1024,
            document_type: "past_paper".to_string(),
            source_date: Some("2023".to_string()),
            source_page: None,
            content_type: Some("application/pdf".to_string()),
            last_modified: None,
        };

        let json = serde_json::to_string(&candidate).unwrap();
        let parsed: DocumentCandidate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.url, candidate.url);
        assert_eq!(parsed.document_type, "past_paper");
    }
}
