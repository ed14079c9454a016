//! Robots.txt fetching and policy
//!
//! Allow/disallow checks go through the robotstxt crate; crawl delays and
//! sitemap declarations are scanned directly since the matcher does not
//! expose them.

use crate::discovery::requestor::HostRequestor;
use robotstxt::DefaultMatcher;
use url::Url;

/// Parsed robots.txt policy for one host
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    /// Raw robots.txt content (empty means allow all)
    content: String,
    /// Crawl delay in seconds from the global section
    pub crawl_delay: Option<f64>,
    /// Sitemap URLs declared anywhere in the file
    pub sitemaps: Vec<String>,
}

impl RobotsPolicy {
    /// Permissive policy used when robots.txt is absent, unreachable, or
    /// disabled by a domain profile
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            crawl_delay: None,
            sitemaps: Vec::new(),
        }
    }

    /// Parses robots.txt content
    pub fn from_content(content: &str) -> Self {
        let mut crawl_delay = None;
        let mut sitemaps = Vec::new();
        let mut in_global_section = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_lowercase();
                let value = value.trim();

                match key.as_str() {
                    "user-agent" => in_global_section = value == "*",
                    "sitemap" => {
                        if !value.is_empty() {
                            sitemaps.push(value.to_string());
                        }
                    }
                    "crawl-delay" if in_global_section => {
                        if let Ok(delay) = value.parse::<f64>() {
                            crawl_delay = Some(delay);
                        }
                    }
                    _ => {}
                }
            }
        }

        Self {
            content: content.to_string(),
            crawl_delay,
            sitemaps,
        }
    }

    /// Checks whether a URL is allowed for the given user agent
    pub fn allows(&self, url: &str, user_agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }
}

/// Fetches robots.txt for a target's host
///
/// Any fetch failure or non-200 response degrades to allow-all; robots
/// problems never abort discovery.
pub async fn fetch_robots(requestor: &HostRequestor, base_url: &str) -> RobotsPolicy {
    let robots_url = match Url::parse(base_url).and_then(|u| u.join("/robots.txt")) {
        Ok(url) => url.to_string(),
        Err(_) => return RobotsPolicy::allow_all(),
    };

    match requestor.get(&robots_url).await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(content) => RobotsPolicy::from_content(&content),
            Err(e) => {
                tracing::debug!("Failed to read robots.txt body from {}: {}", robots_url, e);
                RobotsPolicy::allow_all()
            }
        },
        Ok(response) => {
            tracing::debug!(
                "robots.txt at {} returned {}, allowing all",
                robots_url,
                response.status()
            );
            RobotsPolicy::allow_all()
        }
        Err(e) => {
            tracing::debug!("Failed to fetch robots.txt from {}: {}", robots_url, e);
            RobotsPolicy::allow_all()
        }
    }
}
