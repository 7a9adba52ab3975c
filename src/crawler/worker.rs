//! The per-worker crawl loop

use crate::crawler::{LinkExtractor, PageFetcher};
use crate::frontier::{Completion, CrawlOutcome, CrawlResult, CrawlTask, Frontier, SkipReason, Take};
use crate::politeness::PolitenessGate;
use crate::robots::RobotsFilter;
use crate::storage::ResultSink;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

/// Local data of one worker: every result it produced
#[derive(Debug, Clone, Default)]
pub struct WorkerData {
    pub worker_id: usize,
    pub results: Vec<CrawlResult>,
}

impl WorkerData {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            results: Vec::new(),
        }
    }
}

/// Shared handles every worker of a run works with
pub(crate) struct WorkerContext {
    pub frontier: Arc<Frontier>,
    pub politeness: Arc<PolitenessGate>,
    pub robots: Arc<RobotsFilter>,
    pub fetcher: Arc<PageFetcher>,
    pub extractor: Arc<dyn LinkExtractor>,
    pub sink: Arc<dyn ResultSink>,
}

/// Runs one worker until the frontier reports done
///
/// Results are pushed into `data` as they are produced so they survive a panic of
/// this worker.
pub(crate) async fn run_worker(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    data: Arc<Mutex<WorkerData>>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let task = match ctx.frontier.take(worker_id).await {
            Take::Task(task) => task,
            Take::Done => break,
        };

        let Some(outcome) = process_task(&ctx, &task).await else {
            // Stopped while waiting on the host; the task stays pending for the checkpoint
            ctx.frontier.release(&task);
            debug!("Worker {} stopped before fetching {}", worker_id, task.url);
            break;
        };

        match ctx.frontier.complete(&task, &outcome) {
            Completion::Retried {
                attempt,
                not_before,
            } => {
                let wait = not_before.saturating_duration_since(tokio::time::Instant::now());
                warn!(
                    "Retrying {} (attempt {}) in {:?} after {}",
                    task.url,
                    attempt,
                    wait,
                    describe(&outcome)
                );
            }
            Completion::Finished { attempts } => {
                let result = CrawlResult {
                    task,
                    outcome,
                    attempts,
                    finished_at: Utc::now(),
                };
                if let Err(e) = ctx.sink.store(&result) {
                    warn!("Failed to store result for {}: {}", result.task.url, e);
                }
                data.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .results
                    .push(result);
            }
            Completion::Untracked => {
                debug!("Dropping outcome for requeued task {}", task.url);
            }
        }
    }

    debug!("Worker {} finished", worker_id);
}

/// Politeness, robots, fetch and link extraction for one task
///
/// Returns None if the run was stopped before the page fetch started.
async fn process_task(ctx: &WorkerContext, task: &CrawlTask) -> Option<CrawlOutcome> {
    let host = task.host();
    let mut permit = tokio::select! {
        permit = ctx.politeness.acquire(&host) => permit,
        _ = ctx.frontier.stopped() => return None,
    };

    let verdict = ctx.robots.check(&task.url).await;
    if let Some(delay) = verdict.crawl_delay {
        permit.raise_min_delay(delay);
    }

    if !verdict.allowed {
        debug!("Skipping {}: disallowed by robots.txt", task.url);
        // The robots.txt request itself counts as a request to the host
        if !verdict.fetched {
            permit.release_unused();
        }
        return Some(CrawlOutcome::Skipped {
            reason: SkipReason::RobotsDisallowed,
        });
    }

    if verdict.fetched {
        tokio::select! {
            _ = permit.pace() => {}
            _ = ctx.frontier.stopped() => return None,
        }
    }

    trace!("Fetching {} (depth {})", task.url, task.depth);
    let fetched = ctx.fetcher.fetch(&task.url).await;
    drop(permit);

    let response = match fetched {
        Ok(response) => response,
        Err(failure) => {
            debug!("Fetch of {} failed: {}", task.url, failure);
            return Some(CrawlOutcome::Failure {
                kind: failure.kind,
                message: failure.message,
            });
        }
    };

    debug!("Fetched {} -> {}", task.url, response.status_code);

    // Error pages and retryable statuses contribute no links
    let extracted_links = if (200..300).contains(&response.status_code) {
        ctx.extractor.extract_links(
            &response.body,
            response.content_type.as_deref(),
            &response.final_url,
        )
    } else {
        Vec::new()
    };

    let mut accepted_links = 0;
    for link in &extracted_links {
        match CrawlTask::child_of(task, link) {
            Ok(child) => {
                if ctx.frontier.offer(child) {
                    accepted_links += 1;
                }
            }
            Err(e) => trace!("Dropping link {} from {}: {}", link, task.url, e),
        }
    }

    Some(CrawlOutcome::Success {
        status_code: response.status_code,
        content_type: response.content_type,
        final_url: response.final_url,
        extracted_links,
        accepted_links,
        body_len: response.body.len(),
    })
}

fn describe(outcome: &CrawlOutcome) -> String {
    match outcome {
        CrawlOutcome::Success { status_code, .. } => format!("HTTP {}", status_code),
        CrawlOutcome::Failure { kind, message } => format!("{}: {}", kind, message),
        CrawlOutcome::Skipped { reason } => reason.to_string(),
    }
}
