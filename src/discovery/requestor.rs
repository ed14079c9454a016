//! Per-host paced HTTP requests
//!
//! All outbound discovery traffic goes through `HostRequestor`, which
//! serializes requests to the same host behind a minimum inter-request
//! delay: the stricter of the domain profile's configured delay and any
//! crawl delay advertised by robots.txt.

use crate::config::EngineSettings;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

/// Builds the HTTP client used for discovery
///
/// Redirects are followed (preflight wants the final URL) and every request
/// carries the configured crawler identity and a bounded timeout so a dead
/// host cannot stall a job.
pub fn build_discovery_client(settings: &EngineSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(settings.user_agent.as_header())
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Extracts the host portion of a URL string
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// HTTP client wrapper enforcing per-host delays
pub struct HostRequestor {
    client: Client,
    delays: Mutex<HashMap<String, f64>>,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl HostRequestor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            delays: Mutex::new(HashMap::new()),
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the minimum delay for a host, keeping the stricter of the
    /// current and new values
    pub fn set_delay(&self, host: &str, delay_seconds: f64) {
        if delay_seconds <= 0.0 {
            return;
        }
        let mut delays = self.delays.lock().expect("delay map poisoned");
        let entry = delays.entry(host.to_string()).or_insert(0.0);
        if delay_seconds > *entry {
            *entry = delay_seconds;
        }
    }

    /// Current delay for a host in seconds
    pub fn delay_for(&self, host: &str) -> f64 {
        self.delays
            .lock()
            .expect("delay map poisoned")
            .get(host)
            .copied()
            .unwrap_or(0.0)
    }

    /// Waits until the host's minimum inter-request delay has elapsed,
    /// then stamps the request time
    async fn pace(&self, url: &str) {
        let host = match host_of(url) {
            Some(host) => host,
            None => return,
        };
        let delay = self.delay_for(&host);
        if delay <= 0.0 {
            return;
        }

        let wait = {
            let last_request = self.last_request.lock().expect("last-request map poisoned");
            last_request.get(&host).and_then(|last| {
                Duration::from_secs_f64(delay).checked_sub(last.elapsed())
            })
        };

        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }

        self.last_request
            .lock()
            .expect("last-request map poisoned")
            .insert(host, Instant::now());
    }

    pub async fn get(&self, url: &str) -> reqwest::Result<reqwest::Response> {
        self.pace(url).await;
        self.client.get(url).send().await
    }

    pub async fn head(&self, url: &str) -> reqwest::Result<reqwest::Response> {
        self.pace(url).await;
        self.client.head(url).send().await
    }

    /// Ranged GET used when a host refuses HEAD
    pub async fn get_ranged(&self, url: &str) -> reqwest::Result<reqwest::Response> {
        self.pace(url).await;
        self.client
            .get(url)
            .header(reqwest::header::RANGE, "bytes=0-1024")
            .send()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://example.org/path?q=1").as_deref(),
            Some("example.org")
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_set_delay_keeps_stricter_value() {
        let requestor = HostRequestor::new(Client::new());
        requestor.set_delay("example.org", 1.0);
        requestor.set_delay("example.org", 0.5);
        assert_eq!(requestor.delay_for("example.org"), 1.0);

        requestor.set_delay("example.org", 2.5);
        assert_eq!(requestor.delay_for("example.org"), 2.5);

        requestor.set_delay("example.org", 0.0);
        assert_eq!(requestor.delay_for("example.org"), 2.5);
        assert_eq!(requestor.delay_for("other.org"), 0.0);
    }

    #[tokio::test]
    async fn test_pace_enforces_minimum_spacing() {
        let requestor = HostRequestor::new(Client::new());
        requestor.set_delay("example.org", 0.05);

        let start = Instant::now();
        requestor.pace("https://example.org/a").await;
        requestor.pace("https://example.org/b").await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_pace_does_not_delay_distinct_hosts() {
        let requestor = HostRequestor::new(Client::new());
        requestor.set_delay("a.org", 5.0);
        requestor.set_delay("b.org", 5.0);

        let start = Instant::now();
        requestor.pace("https://a.org/x").await;
        requestor.pace("https://b.org/x").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
