//! Output module for crawl summaries and reports
//!
//! This module handles:
//! - Aggregating worker results into a [`CrawlSummary`]
//! - Writing the markdown summary of a finished run
//! - Printing the persisted counters of a run

mod markdown;
pub mod stats;

pub use markdown::{format_markdown_summary, write_markdown_summary, SUMMARY_FILE};
pub use stats::{print_run_stats, CrawlSummary};
