use crate::frontier::CrawlOutcome;
use std::time::Duration;

/// Decides whether a finished attempt goes back into the frontier
///
/// Transport failures of a retryable kind and responses whose status is listed in
/// `retry_statuses` are retried, up to `max_retries` extra attempts, each no sooner
/// than `min_redelay` after the previous one finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_redelay: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_redelay: Duration::from_secs(1),
            retry_statuses: vec![429, 503],
        }
    }
}

impl RetryPolicy {
    /// True if the outcome is the kind of result worth another attempt
    pub fn is_retryable(&self, outcome: &CrawlOutcome) -> bool {
        match outcome {
            CrawlOutcome::Failure { kind, .. } => kind.is_retryable(),
            CrawlOutcome::Success { status_code, .. } => {
                self.retry_statuses.contains(status_code)
            }
            CrawlOutcome::Skipped { .. } => false,
        }
    }

    /// True if a task that has already been attempted `attempts` times should be
    /// attempted again after this outcome
    pub fn should_retry(&self, attempts: u32, outcome: &CrawlOutcome) -> bool {
        self.has_attempts_left(attempts) && self.is_retryable(outcome)
    }

    /// True if `attempts` made so far still leave room for another one
    pub fn has_attempts_left(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }
}
