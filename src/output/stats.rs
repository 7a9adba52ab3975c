//! Statistics aggregated from the results of a crawl run
//!
//! This module folds the per-worker results into one [`CrawlSummary`] and prints the
//! persisted counters of a run for the `--stats` command.

use crate::crawler::WorkerData;
use crate::frontier::{CrawlOutcome, CrawlResult};
use crate::storage::RunStats;
use std::collections::BTreeMap;
use std::time::Duration;

/// Summary statistics for a crawl
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlSummary {
    /// Tasks that reached the network and finished, successfully or not
    pub fetched: usize,

    /// Fetches that produced an HTTP response, by status class ("2xx", "4xx", ...)
    pub status_classes: BTreeMap<String, usize>,

    /// Fetches that produced no HTTP response, by failure kind
    pub failures_by_kind: BTreeMap<String, usize>,

    /// Tasks skipped because robots.txt disallowed them
    pub robots_skips: usize,

    /// Finished tasks per host
    pub pages_per_host: BTreeMap<String, usize>,

    // Depth breakdown (depth -> finished tasks)
    pub depth_breakdown: BTreeMap<u32, usize>,

    /// Links extracted from successful pages
    pub links_extracted: usize,

    /// Links that were new to the frontier
    pub links_accepted: usize,

    /// Finished tasks that needed more than one attempt
    pub retried_tasks: usize,

    pub elapsed: Duration,
}

impl CrawlSummary {
    /// Creates a new empty crawl summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregates the local data of every worker of a run
    pub fn from_workers(workers: &[WorkerData], elapsed: Duration) -> Self {
        let mut summary = Self::from_results(workers.iter().flat_map(|w| w.results.iter()));
        summary.elapsed = elapsed;
        summary
    }

    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a CrawlResult>) -> Self {
        let mut summary = Self::new();
        for result in results {
            summary.record(result);
        }
        summary
    }

    fn record(&mut self, result: &CrawlResult) {
        *self.pages_per_host.entry(result.task.host()).or_default() += 1;
        *self.depth_breakdown.entry(result.task.depth).or_default() += 1;
        if result.attempts > 1 {
            self.retried_tasks += 1;
        }

        match &result.outcome {
            CrawlOutcome::Success {
                status_code,
                extracted_links,
                accepted_links,
                ..
            } => {
                self.fetched += 1;
                *self
                    .status_classes
                    .entry(status_class(*status_code))
                    .or_default() += 1;
                self.links_extracted += extracted_links.len();
                self.links_accepted += accepted_links;
            }
            CrawlOutcome::Failure { kind, .. } => {
                self.fetched += 1;
                *self
                    .failures_by_kind
                    .entry(kind.as_str().to_string())
                    .or_default() += 1;
            }
            CrawlOutcome::Skipped { .. } => self.robots_skips += 1,
        }
    }

    /// Every finished task, skipped ones included
    pub fn total_results(&self) -> usize {
        self.fetched + self.robots_skips
    }

    /// Fetches answered with a 2xx status
    pub fn successes(&self) -> usize {
        self.status_classes.get("2xx").copied().unwrap_or(0)
    }

    pub fn failures(&self) -> usize {
        self.failures_by_kind.values().sum()
    }

    /// Returns the success rate of fetches as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.fetched == 0 {
            return 0.0;
        }
        (self.successes() as f64 / self.fetched as f64) * 100.0
    }

    /// Pages fetched per second of wall time
    pub fn pages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.fetched as f64 / secs
    }
}

fn status_class(status_code: u16) -> String {
    format!("{}xx", status_code / 100)
}

/// Prints the persisted counters of a run to stdout
pub fn print_run_stats(stats: &RunStats) {
    println!("=== Crawl Run {} ===\n", stats.run_key);

    println!("Status: {}", stats.status.to_db_string());
    println!("Started: {}", stats.started_at);
    println!("Updated: {}", stats.updated_at);
    println!();

    println!("Frontier:");
    println!("  Pending: {}", stats.pending);
    println!("  Visited: {}", stats.visited);
    println!("  Excluded by robots.txt: {}", stats.excluded);
    println!("  Hosts: {}", stats.hosts);
    println!();

    println!("Stored results: {}", stats.results);
}
