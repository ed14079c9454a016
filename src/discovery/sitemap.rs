//! Sitemap fetching and parsing
//!
//! Handles both `<urlset>` documents and `<sitemapindex>` documents; the
//! caller expands index entries one level deep. Parsing scans the XML for
//! `<loc>`/`<lastmod>` pairs rather than building a full document tree,
//! which tolerates the malformed sitemaps real sites serve.

use crate::discovery::requestor::HostRequestor;
use regex::Regex;
use std::sync::OnceLock;

/// One sitemap entry: a location and its optional last-modified stamp
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
}

fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<(?:url|sitemap)>(.*?)</(?:url|sitemap)>").expect("entry regex")
    })
}

fn loc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<loc>\s*(.*?)\s*</loc>").expect("loc regex"))
}

fn lastmod_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<lastmod>\s*(.*?)\s*</lastmod>").expect("lastmod regex"))
}

/// Parses sitemap XML into entries
///
/// Returns the entries and whether the document was a sitemap index.
pub fn parse_sitemap(content: &str) -> (Vec<SitemapEntry>, bool) {
    let is_index = content.contains("<sitemapindex");
    let mut entries = Vec::new();

    for block in entry_regex().captures_iter(content) {
        let body = &block[1];
        let loc = match loc_regex().captures(body) {
            Some(captures) => captures[1].to_string(),
            None => continue,
        };
        if loc.is_empty() {
            continue;
        }
        let lastmod = lastmod_regex()
            .captures(body)
            .map(|captures| captures[1].to_string())
            .filter(|value| !value.is_empty());
        entries.push(SitemapEntry { loc, lastmod });
    }

    (entries, is_index)
}

/// Fetches and parses one sitemap, capping the number of entries
///
/// Fetch failures and non-200 responses yield an empty entry list so one
/// bad sitemap never aborts discovery.
pub async fn fetch_sitemap(
    requestor: &HostRequestor,
    sitemap_url: &str,
    max_urls: usize,
) -> (Vec<SitemapEntry>, bool) {
    match requestor.get(sitemap_url).await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(content) => {
                let (mut entries, is_index) = parse_sitemap(&content);
                entries.truncate(max_urls);
                (entries, is_index)
            }
            Err(e) => {
                tracing::debug!("Failed to read sitemap body from {}: {}", sitemap_url, e);
                (Vec::new(), false)
            }
        },
        Ok(response) => {
            tracing::debug!("Sitemap {} returned {}", sitemap_url, response.status());
            (Vec::new(), false)
        }
        Err(e) => {
            tracing::debug!("Failed to fetch sitemap {}: {}", sitemap_url, e);
            (Vec::new(), false)
        }
    }
}
