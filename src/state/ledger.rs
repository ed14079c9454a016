//! Runtime crawl ledger
//!
//! URL and document bookkeeping for one executing job: which URLs were
//! crawled, queued, or failed, and which documents came out of the run.
//! The ledger lives next to the job state, is updated by the phase code,
//! and is snapshotted into every checkpoint.

use crate::discovery::DocumentCandidate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// URL and document sets accumulated while a job executes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlLedger {
    pub crawled_urls: BTreeSet<String>,
    pub queued_urls: BTreeSet<String>,
    pub failed_urls: BTreeSet<String>,

    pub downloaded_documents: Vec<DocumentCandidate>,
    /// URLs of documents that made it through the processing phase
    pub processed_documents: Vec<String>,
}

impl CrawlLedger {
    /// Moves a URL from queued to crawled
    pub fn mark_crawled(&mut self, url: &str) {
        self.queued_urls.remove(url);
        self.crawled_urls.insert(url.to_string());
    }

    /// Moves a URL from queued to failed
    pub fn mark_failed(&mut self, url: &str) {
        self.queued_urls.remove(url);
        self.failed_urls.insert(url.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_crawled_and_failed() {
        let mut ledger = CrawlLedger::default();
        ledger.queued_urls.insert("https://example.org/a".into());
        ledger.queued_urls.insert("https://example.org/b".into());

        ledger.mark_crawled("https://example.org/a");
        ledger.mark_failed("https://example.org/b");

        assert!(ledger.queued_urls.is_empty());
        assert!(ledger.crawled_urls.contains("https://example.org/a"));
        assert!(ledger.failed_urls.contains("https://example.org/b"));
    }
}
