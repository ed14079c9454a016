//! GenCrawl main entry point
//!
//! Command-line front end for the crawl orchestration engine: loads a crawl
//! configuration, wires the engine together, runs one job end to end, and
//! prints a completion summary.

use clap::Parser;
use gencrawl::checkpoint::CheckpointManager;
use gencrawl::config::{load_crawl_config_with_hash, EngineSettings};
use gencrawl::discovery::DiscoveryEngine;
use gencrawl::events::EventBus;
use gencrawl::iteration::IterationManager;
use gencrawl::manager::CrawlManager;
use gencrawl::storage::SqliteJobStore;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// GenCrawl: a resumable crawl orchestration engine
///
/// Runs a crawl job from a configuration file: politeness-aware document
/// discovery, a multi-stage lifecycle with durable checkpoints, and a
/// structured event log of everything that happened.
#[derive(Parser, Debug)]
#[command(name = "gencrawl")]
#[command(version = "1.0.0")]
#[command(about = "A resumable crawl orchestration engine", long_about = None)]
struct Cli {
    /// Path to a crawl configuration file (TOML, or JSON from the query
    /// interpreter)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Root directory for durable state (jobs, checkpoints, events, cache)
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_crawl_config_with_hash(&cli.config)?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    // Construct every subsystem once and hand references down; no ambient
    // global state anywhere in the engine.
    let settings = EngineSettings::with_data_dir(&cli.data_dir);
    let event_bus = Arc::new(EventBus::new(settings.event_history_limit));
    let discovery = Arc::new(DiscoveryEngine::new(&settings)?);
    let checkpoints = Arc::new(CheckpointManager::new(settings.checkpoints_dir())?);
    let iterations = Arc::new(IterationManager::new(settings.iterations_dir())?);
    let store = Arc::new(Mutex::new(SqliteJobStore::new(&settings.jobs_db_path())?));

    let manager = CrawlManager::new(
        settings,
        event_bus,
        discovery,
        checkpoints,
        iterations,
        store,
    );
    let restored = manager.load_jobs_from_store()?;
    if restored > 0 {
        tracing::info!("Restored {} previous jobs", restored);
    }

    let crawl_id = manager.create_job(config)?;
    tracing::info!("Executing crawl job {}", crawl_id);
    manager.execute(&crawl_id).await?;

    print_summary(&manager, &crawl_id);

    Ok(())
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gencrawl=info,warn"),
            1 => EnvFilter::new("gencrawl=debug,info"),
            2 => EnvFilter::new("gencrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: shows the validated configuration without crawling
fn handle_dry_run(config: &gencrawl::config::CrawlConfig) {
    println!("=== GenCrawl Dry Run ===\n");

    println!("Targets ({}):", config.targets.len());
    for target in &config.targets {
        println!("  - {}", target);
    }

    println!("\nStrategy: {:?}", config.strategy);
    println!("Respect robots.txt: {}", config.respect_robots_txt);
    println!("Politeness mode: {}", config.polite());

    println!("\nFilters:");
    println!("  File types: {:?}", config.filters.file_types);
    println!("  Keywords: {:?}", config.filters.keywords);
    if !config.filters.document_types.is_empty() {
        println!("  Document types: {:?}", config.filters.document_types);
    }

    println!("\nLimits:");
    println!("  Max documents: {}", config.limits.max_documents);
    println!("  Max sitemaps: {}", config.limits.max_sitemaps);
    println!("  Max sitemap URLs: {}", config.limits.max_sitemap_urls);
    println!("  Max page scans: {}", config.limits.max_page_scans);
    println!("  Per-domain cap: {}", config.limits.per_domain());

    if !config.domain_profiles.is_empty() {
        println!("\nDomain profiles ({}):", config.domain_profiles.len());
        for (host, profile) in &config.domain_profiles {
            println!(
                "  - {} (allow {:?}, delay {:?}s)",
                host, profile.allow_paths, profile.crawl_delay
            );
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Prints the completion summary for one executed job
fn print_summary(manager: &CrawlManager, crawl_id: &str) {
    let Some(status) = manager.status(crawl_id) else {
        return;
    };

    println!("\n=== Crawl Summary ===");
    println!("Job: {}", crawl_id);
    println!("Final state: {}", status.current_state);
    if let Some(duration) = status.duration_seconds {
        println!("Duration: {:.1}s", duration);
    }
    println!(
        "Progress: {:.0}% overall",
        status.overall_progress * 100.0
    );
    println!("URLs crawled: {}", status.metrics.urls_crawled);
    println!("Documents found: {}", status.metrics.documents_found);
    if status.error_count > 0 {
        println!("Errors: {}", status.error_count);
    }

    if let Some(results) = manager.results(crawl_id) {
        if !results.documents.is_empty() {
            println!("\nDocuments:");
            for doc in results.documents.iter().take(20) {
                println!(
                    "  - [{}] {} ({})",
                    doc.document_type, doc.title, doc.url
                );
            }
            if results.documents.len() > 20 {
                println!("  ... and {} more", results.documents.len() - 20);
            }
        }
    }
}
