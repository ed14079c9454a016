//! Discovery Engine integration tests

use gencrawl::config::{CrawlConfig, EngineSettings};
use gencrawl::discovery::DiscoveryEngine;
use gencrawl::manager::JobControl;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a crawl config pointed at a mock server
fn pdf_config(base_url: &str, max_documents: usize) -> CrawlConfig {
    let mut config = CrawlConfig {
        targets: vec![base_url.to_string()],
        ..CrawlConfig::default()
    };
    config.filters.file_types = vec!["pdf".to_string()];
    config.limits.max_documents = max_documents;
    config
}

fn test_engine(data_dir: &std::path::Path) -> DiscoveryEngine {
    let settings = EngineSettings::with_data_dir(data_dir);
    DiscoveryEngine::new(&settings).unwrap()
}

/// Sitemap with 20 PDF URLs; the 5 under /papers/ pass preflight, the 15
/// under /missing/ return 404
async fn mount_twenty_pdf_site(server: &MockServer) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap_index.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;

    let mut urls = String::new();
    for i in 1..=15 {
        urls.push_str(&format!(
            "<url><loc>{}/missing/doc-{:02}.pdf</loc></url>",
            base, i
        ));
    }
    for i in 16..=20 {
        urls.push_str(&format!(
            "<url><loc>{}/papers/doc-{:02}.pdf</loc><lastmod>2023-0{}-01</lastmod></url>",
            base,
            i,
            i - 15
        ));
    }
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("<urlset>{}</urlset>", urls))
                .insert_header("content-type", "application/xml"),
        )
        .mount(server)
        .await;

    Mock::given(method("HEAD"))
        .and(path_regex("^/papers/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .insert_header("content-length", "2048")
                .insert_header("last-modified", "Mon, 01 May 2023 00:00:00 GMT"),
        )
        .mount(server)
        .await;
    Mock::given(method("HEAD"))
        .and(path_regex("^/missing/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sitemap_discovery_respects_document_cap() {
    let server = MockServer::start().await;
    mount_twenty_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let config = pdf_config(&server.uri(), 5);

    let outcome = engine.discover(&config, &JobControl::new()).await.unwrap();

    assert_eq!(outcome.documents.len(), 5);
    assert!(outcome.checked_urls >= 5);
    assert_eq!(outcome.skipped_urls, 15);
    assert!(outcome
        .used_sitemaps
        .iter()
        .any(|s| s.ends_with("/sitemap.xml")));

    for doc in &outcome.documents {
        assert!(doc.url.contains("/papers/"));
        assert_eq!(doc.file_type, "pdf");
        assert_eq!(doc.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(doc.file_size, 2048);
        // lastmod from the sitemap becomes the source date.
        assert!(doc.source_date.is_some());
    }
}

#[tokio::test]
async fn test_discovery_monotone_in_max_documents() {
    let server = MockServer::start().await;
    mount_twenty_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());

    let small = engine
        .discover(&pdf_config(&server.uri(), 3), &JobControl::new())
        .await
        .unwrap();
    let large = engine
        .discover(&pdf_config(&server.uri(), 5), &JobControl::new())
        .await
        .unwrap();

    assert_eq!(small.documents.len(), 3);
    assert_eq!(large.documents.len(), 5);
    assert!(large.documents.len() >= small.documents.len());
}

#[tokio::test]
async fn test_validation_cache_prevents_refetch() {
    let server = MockServer::start().await;
    mount_twenty_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let config = pdf_config(&server.uri(), 5);

    let first = engine.discover(&config, &JobControl::new()).await.unwrap();
    let heads_after_first = count_head_requests(&server).await;
    assert!(heads_after_first > 0);

    // Second pass inside the TTL window: every probe is served from the
    // cache, so the HEAD count must not grow.
    let second = engine.discover(&config, &JobControl::new()).await.unwrap();
    let heads_after_second = count_head_requests(&server).await;

    assert_eq!(heads_after_first, heads_after_second);
    assert_eq!(first.documents.len(), second.documents.len());
}

#[tokio::test]
async fn test_robots_disallow_skips_without_probing() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "User-agent: *\nDisallow: /private\nSitemap: {}/sitemap.xml",
            base
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<urlset><url><loc>{}/private/a.pdf</loc></url>\
             <url><loc>{}/public/b.pdf</loc></url></urlset>",
            base, base
        )))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let outcome = engine
        .discover(&pdf_config(&base, 10), &JobControl::new())
        .await
        .unwrap();

    assert_eq!(outcome.documents.len(), 1);
    assert!(outcome.documents[0].url.contains("/public/"));
    assert!(outcome.skipped_urls >= 1);

    // The disallowed URL never reaches preflight.
    let requests = server.received_requests().await.unwrap();
    assert!(!requests
        .iter()
        .any(|r| r.method.to_string() == "HEAD" && r.url.path() == "/private/a.pdf"));
}

#[tokio::test]
async fn test_sitemap_index_expanded_one_level() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap_index.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<sitemapindex><sitemap><loc>{}/sitemap-docs.xml</loc></sitemap></sitemapindex>",
            base
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap-docs.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<urlset><url><loc>{}/docs/paper.pdf</loc></url></urlset>",
            base
        )))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let outcome = engine
        .discover(&pdf_config(&base, 10), &JobControl::new())
        .await
        .unwrap();

    assert_eq!(outcome.documents.len(), 1);
    assert!(outcome
        .used_sitemaps
        .iter()
        .any(|s| s.ends_with("/sitemap-docs.xml")));
}

#[tokio::test]
async fn test_page_scan_finds_linked_documents() {
    let server = MockServer::start().await;
    let base = server.uri();

    // No robots, no sitemaps: discovery falls back to scanning the target
    // page itself.
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/sitemap"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    r#"<html><body>
                        <a href="/downloads/syllabus-2024.pdf">Syllabus</a>
                        <a href="/about">About</a>
                    </body></html>"#,
                )
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let outcome = engine
        .discover(&pdf_config(&base, 10), &JobControl::new())
        .await
        .unwrap();

    assert_eq!(outcome.documents.len(), 1);
    let doc = &outcome.documents[0];
    assert!(doc.url.ends_with("/downloads/syllabus-2024.pdf"));
    assert_eq!(doc.document_type, "syllabus");
    // The linking page is recorded as the source.
    assert_eq!(doc.source_page.as_deref(), Some(base.as_str()));
}

#[tokio::test]
async fn test_per_domain_cap_limits_one_host() {
    let server = MockServer::start().await;
    mount_twenty_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let mut config = pdf_config(&server.uri(), 10);
    config.limits.max_documents_per_domain = Some(2);

    let outcome = engine.discover(&config, &JobControl::new()).await.unwrap();
    assert_eq!(outcome.documents.len(), 2);
}

#[tokio::test]
async fn test_cancelled_control_stops_discovery() {
    let server = MockServer::start().await;
    mount_twenty_pdf_site(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine(dir.path());
    let control = JobControl::new();
    control.cancel();

    let outcome = engine
        .discover(&pdf_config(&server.uri(), 5), &control)
        .await
        .unwrap();

    // Cancelled before the first fetch: nothing was discovered.
    assert!(outcome.documents.is_empty());
    assert_eq!(outcome.checked_urls, 0);
}

async fn count_head_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.to_string() == "HEAD")
        .count()
}
