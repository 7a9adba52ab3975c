//! Markdown summary generation
//!
//! This module renders a finished run's report as a human-readable markdown
//! document, including statistics, failures and per-host counts.

use crate::crawler::CrawlReport;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the summary inside the storage folder
pub const SUMMARY_FILE: &str = "summary.md";

/// Writes the markdown summary of a run into `folder`
///
/// # Arguments
///
/// * `report` - The finished run's report
/// * `folder` - Directory to write `summary.md` into; created if missing
///
/// # Returns
///
/// * `Ok(PathBuf)` - Path of the written file
/// * `Err(io::Error)` - Failed to write summary
pub fn write_markdown_summary(report: &CrawlReport, folder: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(folder)?;
    let path = folder.join(SUMMARY_FILE);

    let mut file = File::create(&path)?;
    file.write_all(format_markdown_summary(report).as_bytes())?;

    Ok(path)
}

/// Formats a run report as markdown
pub fn format_markdown_summary(report: &CrawlReport) -> String {
    let summary = &report.summary;
    let mut md = String::new();

    md.push_str("# Ripple-Crawl Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Run Key**: {}\n", report.run_key));
    md.push_str(&format!("- **Phase**: {}\n", report.phase));
    md.push_str(&format!(
        "- **Complete**: {}\n",
        if report.is_complete() { "yes" } else { "no" }
    ));
    md.push_str(&format!(
        "- **Duration**: {:.1} seconds\n",
        summary.elapsed.as_secs_f64()
    ));
    md.push_str(&format!("- **Workers**: {}\n", report.workers.len()));
    if report.crashed_workers > 0 {
        md.push_str(&format!(
            "- **Crashed Workers**: {}\n",
            report.crashed_workers
        ));
    }
    md.push('\n');

    // Overall statistics
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Pages Fetched**: {}\n", summary.fetched));
    md.push_str(&format!(
        "- **Skipped by robots.txt**: {}\n",
        summary.robots_skips
    ));
    md.push_str(&format!("- **Failures**: {}\n", summary.failures()));
    md.push_str(&format!("- **Retried Tasks**: {}\n", summary.retried_tasks));
    md.push_str(&format!(
        "- **Links Extracted**: {} ({} new)\n",
        summary.links_extracted, summary.links_accepted
    ));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n",
        summary.success_rate()
    ));
    md.push_str(&format!(
        "- **Throughput**: {:.2} pages/s\n\n",
        summary.pages_per_second()
    ));

    // Frontier
    md.push_str("## Frontier\n\n");
    md.push_str("| Set | Count |\n");
    md.push_str("|-----|-------|\n");
    md.push_str(&format!("| Visited | {} |\n", report.frontier.visited));
    md.push_str(&format!("| Excluded | {} |\n", report.frontier.excluded));
    md.push_str(&format!("| Pending | {} |\n", report.frontier.pending));
    md.push_str(&format!(
        "| In Progress | {} |\n\n",
        report.frontier.in_progress
    ));

    if !summary.status_classes.is_empty() {
        md.push_str("## HTTP Status Classes\n\n");
        md.push_str("| Class | Count |\n");
        md.push_str("|-------|-------|\n");
        for (class, count) in &summary.status_classes {
            md.push_str(&format!("| {} | {} |\n", class, count));
        }
        md.push('\n');
    }

    if !summary.failures_by_kind.is_empty() {
        md.push_str("## Failures\n\n");
        md.push_str("| Kind | Count |\n");
        md.push_str("|------|-------|\n");
        for (kind, count) in &summary.failures_by_kind {
            md.push_str(&format!("| {} | {} |\n", kind, count));
        }
        md.push('\n');
    }

    if !summary.depth_breakdown.is_empty() {
        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | Pages |\n");
        md.push_str("|-------|-------|\n");
        for (depth, count) in &summary.depth_breakdown {
            md.push_str(&format!("| {} | {} |\n", depth, count));
        }
        md.push('\n');
    }

    // Hosts, busiest first
    if !summary.pages_per_host.is_empty() {
        md.push_str("## Hosts\n\n");
        md.push_str(&format!(
            "Total hosts: {}\n\n",
            summary.pages_per_host.len()
        ));
        md.push_str("| Host | Pages |\n");
        md.push_str("|------|-------|\n");

        let mut hosts: Vec<_> = summary.pages_per_host.iter().collect();
        hosts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (host, count) in hosts.iter().take(50) {
            md.push_str(&format!("| {} | {} |\n", host, count));
        }
        if hosts.len() > 50 {
            md.push_str(&format!("\n... and {} more\n", hosts.len() - 50));
        }
        md.push('\n');
    }

    md
}
