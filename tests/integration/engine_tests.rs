//! End-to-end job lifecycle tests

use gencrawl::checkpoint::{CheckpointManager, CheckpointType};
use gencrawl::config::{CrawlConfig, EngineSettings};
use gencrawl::discovery::DiscoveryEngine;
use gencrawl::events::{EventBus, EventType};
use gencrawl::iteration::{IterationManager, IterationMode, IterationStats};
use gencrawl::manager::CrawlManager;
use gencrawl::state::JobState;
use gencrawl::storage::SqliteJobStore;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn build_manager(data_dir: &Path) -> Arc<CrawlManager> {
    let settings = EngineSettings::with_data_dir(data_dir);
    let event_bus = Arc::new(EventBus::new(settings.event_history_limit));
    let discovery = Arc::new(DiscoveryEngine::new(&settings).unwrap());
    let checkpoints = Arc::new(CheckpointManager::new(settings.checkpoints_dir()).unwrap());
    let iterations = Arc::new(IterationManager::new(settings.iterations_dir()).unwrap());
    let store = Arc::new(Mutex::new(
        SqliteJobStore::new(&settings.jobs_db_path()).unwrap(),
    ));
    Arc::new(CrawlManager::new(
        settings, event_bus, discovery, checkpoints, iterations, store,
    ))
}

/// Mounts a small PDF site whose responses are slow enough that a test can
/// interleave pause/cancel calls with the crawling phase
async fn mount_slow_pdf_site(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(100)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap_index.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;

    let mut urls = String::new();
    for i in 1..=5 {
        urls.push_str(&format!("<url><loc>{}/docs/paper-{}.pdf</loc></url>", base, i));
    }
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("<urlset>{}</urlset>", urls))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(server)
        .await;

    Mock::given(method("HEAD"))
        .and(path_regex("^/docs/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_delay(Duration::from_millis(150)),
        )
        .mount(server)
        .await;
}

fn slow_site_config(base_url: &str) -> CrawlConfig {
    let mut config = CrawlConfig {
        targets: vec![base_url.to_string()],
        ..CrawlConfig::default()
    };
    config.filters.file_types = vec!["pdf".to_string()];
    config.limits.max_documents = 5;
    config
}

async fn wait_for_state(
    manager: &CrawlManager,
    crawl_id: &str,
    state: JobState,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if manager.status(crawl_id).map(|s| s.current_state) == Some(state) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_full_crawl_against_mock_site() {
    let server = MockServer::start().await;
    mount_slow_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(dir.path());

    let crawl_id = manager.create_job(slow_site_config(&server.uri())).unwrap();
    manager.execute(&crawl_id).await.unwrap();

    let status = manager.status(&crawl_id).unwrap();
    assert_eq!(status.current_state, JobState::Completed);
    assert_eq!(status.metrics.documents_found, 5);

    let results = manager.results(&crawl_id).unwrap();
    assert_eq!(results.documents.len(), 5);
    assert!(results
        .documents
        .iter()
        .all(|doc| doc.url.contains("/docs/")));

    // The event stream saw the discovery and the documents.
    let found = manager
        .event_bus()
        .get_by_type(&crawl_id, EventType::DocumentFound, 50);
    assert_eq!(found.len(), 5);

    // Progress adds up: completed + failed <= total in every phase.
    let detail = manager.state_detail(&crawl_id).unwrap();
    for phase in [
        &detail.progress.urls,
        &detail.progress.documents,
        &detail.progress.extractions,
        &detail.progress.processing,
    ] {
        assert!(phase.completed + phase.failed <= phase.total);
    }
}

#[tokio::test]
async fn test_pause_and_resume_during_crawling() {
    let server = MockServer::start().await;
    mount_slow_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(dir.path());
    let crawl_id = manager.create_job(slow_site_config(&server.uri())).unwrap();

    let task = {
        let manager = manager.clone();
        let crawl_id = crawl_id.clone();
        tokio::spawn(async move { manager.execute(&crawl_id).await })
    };

    assert!(wait_for_state(&manager, &crawl_id, JobState::Crawling, Duration::from_secs(5)).await);

    // Pause mid-crawl.
    assert!(manager.pause_job(&crawl_id).unwrap());
    let status = manager.status(&crawl_id).unwrap();
    assert_eq!(status.current_state, JobState::Paused);
    assert!(status.can_resume);
    assert!(!status.can_pause);

    // Pausing twice in a row returns false.
    assert!(!manager.pause_job(&crawl_id).unwrap());

    // A pause checkpoint was taken.
    let checkpoints = manager.checkpoints().list(&crawl_id);
    assert!(checkpoints
        .iter()
        .any(|c| c.checkpoint_type == CheckpointType::Pause));

    // Resume returns to the phase that was active before pausing.
    assert!(manager.resume_job(&crawl_id).unwrap());
    assert_eq!(
        manager.status(&crawl_id).unwrap().current_state,
        JobState::Crawling
    );

    task.await.unwrap().unwrap();
    assert_eq!(
        manager.status(&crawl_id).unwrap().current_state,
        JobState::Completed
    );
}

#[tokio::test]
async fn test_cancel_during_processing_wins_over_completion() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(dir.path());

    // Degraded-mode job (no targets) so the pipeline runs without a server.
    let crawl_id = manager.create_job(CrawlConfig::default()).unwrap();

    // Cancel synchronously the moment the processing phase announces its
    // first substate.
    let bus = manager.event_bus().clone();
    let cancel_manager = manager.clone();
    let cancel_id = crawl_id.clone();
    bus.subscribe(
        &crawl_id,
        Arc::new(move |event| {
            if event.event_type == EventType::SubstateChange
                && event.data["substate"] == "metadata_extraction"
            {
                cancel_manager.cancel_job(&cancel_id).ok();
            }
            Ok(())
        }),
    );

    manager.execute(&crawl_id).await.unwrap();

    // Even though processing would have finished, cancellation wins.
    let status = manager.status(&crawl_id).unwrap();
    assert_eq!(status.current_state, JobState::Cancelled);
    assert!(status.is_terminal);
    assert!(status.completed_at.is_some());
}

#[tokio::test]
async fn test_cancel_unblocks_paused_job() {
    let server = MockServer::start().await;
    mount_slow_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(dir.path());
    let crawl_id = manager.create_job(slow_site_config(&server.uri())).unwrap();

    let task = {
        let manager = manager.clone();
        let crawl_id = crawl_id.clone();
        tokio::spawn(async move { manager.execute(&crawl_id).await })
    };

    assert!(wait_for_state(&manager, &crawl_id, JobState::Crawling, Duration::from_secs(5)).await);
    assert!(manager.pause_job(&crawl_id).unwrap());

    // Cancelling wakes the paused task so it can exit.
    assert!(manager.cancel_job(&crawl_id).unwrap());
    task.await.unwrap().unwrap();

    let status = manager.status(&crawl_id).unwrap();
    assert_eq!(status.current_state, JobState::Cancelled);

    // Neither resume nor a second cancel applies to a terminal job.
    assert!(!manager.resume_job(&crawl_id).unwrap());
    assert!(!manager.cancel_job(&crawl_id).unwrap());
}

#[tokio::test]
async fn test_state_persisted_across_restart() {
    let server = MockServer::start().await;
    mount_slow_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let crawl_id;
    {
        let manager = build_manager(dir.path());
        crawl_id = manager.create_job(slow_site_config(&server.uri())).unwrap();
        manager.execute(&crawl_id).await.unwrap();
    }

    // A new manager over the same data dir restores the finished job.
    let manager = build_manager(dir.path());
    manager.load_jobs_from_store().unwrap();

    let detail = manager.state_detail(&crawl_id).unwrap();
    assert_eq!(detail.current_state, JobState::Completed);
    assert!(detail.is_terminal);
    assert_eq!(
        detail.state_history.last().map(|t| t.to_state),
        Some(JobState::Completed)
    );
}

#[tokio::test]
async fn test_two_iterations_classify_changes() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(dir.path());
    let iterations = manager.iterations();

    let url = "https://example.org/docs/paper.pdf";

    let first = iterations
        .create_iteration("crawl-1", serde_json::json!({}), IterationMode::Baseline)
        .unwrap();
    iterations.record(&first, url, b"version one", None, None).unwrap();
    iterations.complete(&first, IterationStats::default()).unwrap();

    let second = iterations
        .create_iteration("crawl-1", serde_json::json!({}), IterationMode::Full)
        .unwrap();
    iterations
        .record(&second, url, b"version one", None, None)
        .unwrap();

    // Identical content hash lands in unchanged.
    let same = iterations.compare(&first, &second);
    assert_eq!(same.unchanged_documents, vec![url.to_string()]);
    assert!(same.modified_documents.is_empty());

    // Re-record with different content: the document moves to modified.
    iterations
        .record(&second, url, b"version two", None, None)
        .unwrap();
    let changed = iterations.compare(&first, &second);
    assert_eq!(changed.modified_documents, vec![url.to_string()]);
    assert!(changed.unchanged_documents.is_empty());
}
