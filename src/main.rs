//! Ripple-Crawl main entry point
//!
//! This is the command-line interface for the Ripple-Crawl crawl engine.

use anyhow::{bail, Context};
use clap::Parser;
use ripple_crawl::config::{
    load_config, Config, ConfigCredentialProvider, CredentialProvider, CrawlConfig,
};
use ripple_crawl::output::{print_run_stats, write_markdown_summary};
use ripple_crawl::storage::{open_storage, FrontierStore};
use ripple_crawl::{CrawlController, CrawlPhase};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Ripple-Crawl: a polite, resumable web crawler
///
/// Ripple-Crawl fetches pages across many hosts while respecting robots.txt,
/// per-host politeness delays and page budgets. Resumable runs checkpoint their
/// frontier so an interrupted crawl picks up where it left off.
#[derive(Parser, Debug)]
#[command(name = "ripple-crawl")]
#[command(version)]
#[command(about = "A polite, resumable web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Discard persisted state for this run and start over
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "fresh"])]
    dry_run: bool,

    /// Show persisted statistics for this run and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let crawl = CrawlConfig::from_file_config(&config);
    crawl.validate().context("invalid crawl configuration")?;

    if cli.dry_run {
        handle_dry_run(&crawl);
        return Ok(());
    }
    if cli.stats {
        return handle_stats(&crawl);
    }

    handle_crawl(&config, crawl, cli.fresh).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_crawl=info,warn"),
            1 => EnvFilter::new("ripple_crawl=debug,info"),
            2 => EnvFilter::new("ripple_crawl=trace,debug"),
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

/// Handles the --dry-run mode: prints the validated plan
fn handle_dry_run(crawl: &CrawlConfig) {
    println!("=== Ripple-Crawl Dry Run ===\n");

    println!("Run key: {}\n", crawl.run_key());

    println!("Crawler Configuration:");
    println!("  Workers: {}", crawl.thread_pool_size);
    println!("  Max pages: {}", crawl.max_pages_to_fetch);
    println!("  Max depth: {}", crawl.max_depth);
    println!("  Politeness delay: {:?}", crawl.politeness_delay);
    println!("  Max crawl delay: {:?}", crawl.max_crawl_delay);
    if let Some(per_domain) = crawl.max_pages_per_domain {
        println!("  Max pages per domain: {}", per_domain);
    }
    println!("  Request timeout: {:?}", crawl.request_timeout);
    println!("  Max redirects: {}", crawl.max_redirects);
    println!(
        "  Retries: {} (statuses {:?})",
        crawl.retry.max_retries, crawl.retry.retry_statuses
    );

    println!("\nUser Agent: {}", crawl.user_agent);
    println!("Robots agent: {}", crawl.robots_agent);

    println!("\nStorage:");
    println!("  Folder: {}", crawl.storage_folder.display());
    println!("  Resumable: {}", crawl.resumable);

    let patterns = crawl.allowed_domains.patterns();
    if patterns.is_empty() {
        println!("\nAllowed Domains: unrestricted");
    } else {
        println!("\nAllowed Domains ({}):", patterns.len());
        for pattern in patterns {
            println!("  - {}", pattern);
        }
    }

    println!("\nSeeds ({}):", crawl.seeds.len());
    for seed in &crawl.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows the persisted counters of this run
fn handle_stats(crawl: &CrawlConfig) -> anyhow::Result<()> {
    let storage = open_storage(&crawl.storage_folder).with_context(|| {
        format!(
            "failed to open storage in {}",
            crawl.storage_folder.display()
        )
    })?;

    match storage.run_stats(&crawl.run_key())? {
        Some(stats) => print_run_stats(&stats),
        None => println!("No persisted run for run key {}", crawl.run_key()),
    }
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, crawl: CrawlConfig, fresh: bool) -> anyhow::Result<()> {
    if fresh && crawl.resumable {
        tracing::info!("Starting fresh crawl (discarding previous state)");
        let storage = open_storage(&crawl.storage_folder)?;
        storage
            .clear_run(&crawl.run_key())
            .context("failed to discard persisted run state")?;
    }

    let mut builder = CrawlController::builder(crawl.clone());
    if let Some(raw) = &config.credentials {
        let credentials = ConfigCredentialProvider
            .resolve(raw)
            .context("failed to resolve credentials")?;
        builder = builder.credentials(credentials);
    }
    let controller = Arc::new(builder.build().context("failed to set up crawl")?);

    tracing::info!("Total seed URLs: {}", crawl.seeds.len());
    controller.seed()?;
    controller.start()?;

    // Ctrl-C requests a cooperative stop; the run still drains and checkpoints
    let stopper = Arc::clone(&controller);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight tasks");
            stopper.stop();
        }
    });

    let report = controller.wait_until_finish().await;
    signal.abort();
    let report = report.context("crawl failed")?;

    match write_markdown_summary(&report, &crawl.storage_folder) {
        Ok(path) => tracing::info!("Summary written to {}", path.display()),
        Err(e) => tracing::warn!("Failed to write summary: {}", e),
    }

    let summary = &report.summary;
    tracing::info!(
        "Fetched {} pages ({} successful, {} failed, {} skipped by robots.txt) in {:.1?}",
        summary.fetched,
        summary.successes(),
        summary.failures(),
        summary.robots_skips,
        summary.elapsed
    );

    if report.phase != CrawlPhase::Finished {
        bail!("crawl ended in phase {}", report.phase);
    }
    Ok(())
}
