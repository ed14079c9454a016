//! Phase execution
//!
//! The pipeline drives QUEUED -> INITIALIZING -> CRAWLING -> EXTRACTING ->
//! PROCESSING -> COMPLETED, persisting after every transition and polling
//! the job's control at every suspension point: per URL, per document, and
//! at each substate boundary.
//!
//! The extraction and processing pipelines themselves are external
//! collaborators; the engine walks their substates and mirrors their phase
//! totals.

use super::{CrawlManager, JobSlot, PhaseResult};
use crate::checkpoint::CheckpointType;
use crate::discovery::DiscoveryOutcome;
use crate::events::{CrawlEvent, EventType};
use crate::state::{JobState, JobSubstate};
use serde_json::{json, Value};
use std::sync::Arc;

/// Synthetic URL total used when discovery yields nothing
const SYNTHETIC_URL_TOTAL: u64 = 100;

/// Synthetic document total used when discovery yields nothing
const SYNTHETIC_DOCUMENT_TOTAL: u64 = 50;

impl CrawlManager {
    pub(crate) async fn run_pipeline(&self, slot: &Arc<JobSlot>) -> PhaseResult<()> {
        self.transition_state(slot, JobState::Initializing, Value::Null)?;
        self.persist(slot);
        slot.control.checkpoint().await?;

        self.transition_state(slot, JobState::Crawling, Value::Null)?;
        self.persist(slot);
        self.crawl_phase(slot).await?;

        slot.control.checkpoint().await?;
        self.transition_state(slot, JobState::Extracting, Value::Null)?;
        self.persist(slot);
        self.extract_phase(slot).await?;

        slot.control.checkpoint().await?;
        self.transition_state(slot, JobState::Processing, Value::Null)?;
        self.persist(slot);
        self.process_phase(slot).await?;

        self.transition_state(slot, JobState::Completed, Value::Null)?;
        self.persist(slot);
        Ok(())
    }

    /// Crawling phase: discovery, page bookkeeping, document events
    async fn crawl_phase(&self, slot: &Arc<JobSlot>) -> PhaseResult<()> {
        self.set_substate(slot, JobSubstate::DiscoveringUrls)?;
        slot.control.checkpoint().await?;

        let config = slot.data.lock().expect("job data poisoned").config.clone();
        let discovery = match self.discovery.discover(&config, &slot.control).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Discovery failed for {}: {}", slot.crawl_id, e);
                self.event_bus
                    .publish_error(&slot.crawl_id, "discovery_error", &e.to_string());
                DiscoveryOutcome::default()
            }
        };
        slot.control.checkpoint().await?;

        let degraded = discovery.documents.is_empty();
        if degraded {
            // Deliberate degraded mode: without a live target the pipeline
            // still runs on bounded synthetic totals, and says so loudly.
            tracing::warn!(
                "Discovery found no candidates for {}; running synthetic progress estimate",
                slot.crawl_id
            );
            self.event_bus.publish(
                CrawlEvent::new(
                    &slot.crawl_id,
                    EventType::Warning,
                    json!({
                        "message": "discovery returned no candidates; using synthetic progress estimate"
                    }),
                )
                .with_metadata(json!({ "degraded": true })),
            );
        } else {
            tracing::info!(
                "Discovery for {}: {} documents from {} sitemaps ({} checked, {} skipped)",
                slot.crawl_id,
                discovery.documents.len(),
                discovery.used_sitemaps.len(),
                discovery.checked_urls,
                discovery.skipped_urls
            );
        }

        if !degraded {
            {
                let mut data = slot.data.lock().expect("job data poisoned");
                let total = discovery
                    .checked_urls
                    .max(discovery.documents.len() as u64);
                data.progress.urls.total = total;
                data.progress.urls.completed = total;
                data.metrics.urls_crawled = total;
                data.metrics.update_success_rate();
            }
            {
                let mut ledger = slot.ledger.lock().expect("job ledger poisoned");
                for doc in &discovery.documents {
                    ledger.queued_urls.insert(doc.url.clone());
                }
            }
            self.publish_progress(slot);
        } else {
            let mut data = slot.data.lock().expect("job data poisoned");
            data.progress.urls.total = SYNTHETIC_URL_TOTAL;
        }

        self.set_substate(slot, JobSubstate::DownloadingPages)?;
        if degraded {
            for page in 0..SYNTHETIC_URL_TOTAL {
                slot.control.checkpoint().await?;

                {
                    let mut data = slot.data.lock().expect("job data poisoned");
                    data.progress.urls.record_completed();
                    data.metrics.urls_crawled += 1;
                    data.metrics.update_success_rate();
                }

                if page % 10 == 0 {
                    self.publish_progress(slot);
                }
                if page % 25 == 0 {
                    self.persist(slot);
                }
            }
        }

        self.set_substate(slot, JobSubstate::DownloadingDocuments)?;
        if !degraded {
            {
                let mut data = slot.data.lock().expect("job data poisoned");
                data.progress.documents.total = discovery.documents.len() as u64;
            }

            let discovery_stats = json!({
                "checked_urls": discovery.checked_urls,
                "skipped_urls": discovery.skipped_urls,
                "sitemaps": discovery.used_sitemaps,
            });

            let mut since_checkpoint = 0u64;
            for doc in &discovery.documents {
                slot.control.checkpoint().await?;

                {
                    let mut data = slot.data.lock().expect("job data poisoned");
                    data.progress.documents.record_completed();
                    data.metrics.documents_found += 1;
                    data.metrics.documents_downloaded += 1;
                }
                {
                    let mut ledger = slot.ledger.lock().expect("job ledger poisoned");
                    ledger.mark_crawled(&doc.url);
                    ledger.downloaded_documents.push(doc.clone());
                }

                self.event_bus.publish_document_found(
                    &slot.crawl_id,
                    &doc.url,
                    &doc.document_type,
                    json!({
                        "title": doc.title,
                        "file_type": doc.file_type,
                        "file_size": doc.file_size,
                        "source_date": doc.source_date,
                        "source_page": doc.source_page,
                        "content_type": doc.content_type,
                        "last_modified": doc.last_modified,
                        "discovery": discovery_stats,
                    }),
                );

                since_checkpoint += 1;
                if since_checkpoint >= self.settings.auto_checkpoint_interval {
                    since_checkpoint = 0;
                    let (data, ledger) = self.snapshot(slot);
                    if let Err(e) = self.checkpoints.create_checkpoint(
                        &data,
                        &ledger,
                        CheckpointType::Auto,
                        Value::Null,
                    ) {
                        tracing::warn!("Auto checkpoint for {} failed: {}", slot.crawl_id, e);
                    }
                }
            }

            self.publish_progress(slot);
            self.persist(slot);
        } else {
            {
                let mut data = slot.data.lock().expect("job data poisoned");
                data.progress.documents.total = SYNTHETIC_DOCUMENT_TOTAL;
                data.progress.documents.completed = SYNTHETIC_DOCUMENT_TOTAL;
                data.metrics.documents_found = SYNTHETIC_DOCUMENT_TOTAL;
            }
            self.publish_progress(slot);
            self.persist(slot);

            self.emit_synthetic_documents(slot, &config).await?;
        }

        Ok(())
    }

    /// Synthetic document events so the downstream ingestion pipeline stays
    /// exercisable without a live target
    async fn emit_synthetic_documents(
        &self,
        slot: &Arc<JobSlot>,
        config: &crate::config::CrawlConfig,
    ) -> PhaseResult<()> {
        let base_target = config
            .targets
            .first()
            .map(|t| t.trim_end_matches('/').to_string())
            .unwrap_or_else(|| "https://example.com".to_string());

        let program = config
            .taxonomy
            .program()
            .unwrap_or_else(|| "CSEC".to_string());
        let subject = config
            .taxonomy
            .subject()
            .unwrap_or_else(|| "Mathematics".to_string());
        let document_type = config
            .taxonomy
            .document_type()
            .unwrap_or_else(|| "past_paper".to_string());

        for index in 0..SYNTHETIC_DOCUMENT_TOTAL {
            slot.control.checkpoint().await?;

            let year = 2019 + (index % 6);
            let title = format!(
                "{} {} {} {}",
                program,
                subject,
                year,
                document_type.replace('_', " ")
            );
            let url = format!(
                "{}/documents/{}-{}-{}-{}.pdf",
                base_target,
                program.to_lowercase(),
                subject.to_lowercase(),
                year,
                index + 1
            );

            self.event_bus.publish(
                CrawlEvent::new(
                    &slot.crawl_id,
                    EventType::DocumentFound,
                    json!({
                        "url": url,
                        "document_type": &document_type,
                    }),
                )
                .with_metadata(json!({
                    "title": title,
                    "file_type": "pdf",
                    "file_size": 1024 * (index + 1),
                    "tags": [&program, &subject, &year.to_string()],
                    "degraded": true,
                })),
            );
        }

        Ok(())
    }

    /// Extraction phase: walk substates, mirror totals from the crawl phase
    async fn extract_phase(&self, slot: &Arc<JobSlot>) -> PhaseResult<()> {
        let extractions_total = {
            let mut data = slot.data.lock().expect("job data poisoned");
            let total = data.progress.documents.completed;
            data.progress.extractions.total = total;
            total
        };

        for substate in [
            JobSubstate::PdfExtraction,
            JobSubstate::Ocr,
            JobSubstate::TableDetection,
        ] {
            slot.control.checkpoint().await?;
            self.set_substate(slot, substate)?;
        }

        {
            let mut data = slot.data.lock().expect("job data poisoned");
            data.progress.extractions.completed = extractions_total;
        }
        self.publish_progress(slot);
        self.persist(slot);

        Ok(())
    }

    /// Processing phase: walk substates, complete the ledger
    async fn process_phase(&self, slot: &Arc<JobSlot>) -> PhaseResult<()> {
        for substate in [
            JobSubstate::MetadataExtraction,
            JobSubstate::QualityScoring,
            JobSubstate::Deduplication,
            JobSubstate::Curation,
        ] {
            slot.control.checkpoint().await?;
            self.set_substate(slot, substate)?;
        }

        {
            let mut data = slot.data.lock().expect("job data poisoned");
            let total = data.progress.extractions.completed;
            data.progress.processing.total = total;
            data.progress.processing.completed = total;
            data.metrics.documents_processed = total;
        }
        {
            let mut ledger = slot.ledger.lock().expect("job ledger poisoned");
            let processed: Vec<String> = ledger
                .downloaded_documents
                .iter()
                .map(|doc| doc.url.clone())
                .collect();
            ledger.processed_documents = processed;
        }

        self.publish_progress(slot);
        self.persist(slot);

        Ok(())
    }
}
