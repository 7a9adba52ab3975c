//! The URL frontier
//!
//! A shared queue of discovered URLs. It deduplicates by fingerprint, enforces the
//! depth, page and per-host budgets, hands each task to exactly one worker, and
//! applies the retry policy when a worker reports back.
//!
//! The internal lock is a `std::sync::Mutex` that is never held across an `.await`.
//! Waiting in [`Frontier::take`] is done on a [`Notify`], so fetch I/O never holds
//! the frontier lock.

mod retry;
mod state;
mod task;

pub use retry::RetryPolicy;
pub use state::{FrontierState, PendingTask};
pub use task::{CrawlOutcome, CrawlResult, CrawlTask, SkipReason};

use crate::config::CrawlConfig;
use crate::url::{extract_domain, host_key, DomainScope};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Admission limits applied by [`Frontier::offer`]
#[derive(Debug, Clone)]
pub struct FrontierLimits {
    pub max_pages: usize,
    pub max_depth: u32,
    pub max_pages_per_domain: Option<usize>,
    pub scope: DomainScope,
}

impl FrontierLimits {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            max_pages: config.max_pages_to_fetch,
            max_depth: config.max_depth,
            max_pages_per_domain: config.max_pages_per_domain,
            scope: config.allowed_domains.clone(),
        }
    }
}

/// Why an offered task was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The frontier is draining
    Closed,
    TooDeep,
    OutOfScope,
    Duplicate,
    /// The run already accepted `max_pages` tasks
    PageBudget,
    /// The host already accepted `max_pages_per_domain` tasks
    DomainBudget,
}

/// Result of [`Frontier::take`]
#[derive(Debug)]
pub enum Take {
    Task(CrawlTask),
    /// Nothing will ever be handed out again
    Done,
}

/// What the frontier did with a finished attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The task went back into `pending` and will not be handed out before `not_before`
    Retried { attempt: u32, not_before: Instant },
    /// The task is settled; `attempts` counts every fetch attempt made
    Finished { attempts: u32 },
    /// The task was not checked out, e.g. it was already requeued
    Untracked,
}

/// A task taken back from a worker that died while holding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reclaimed {
    /// Back at the front of `pending`
    Requeued(CrawlTask),
    /// The crash used up the last attempt; the task is settled in `visited`
    Abandoned { task: CrawlTask, attempts: u32 },
}

impl Reclaimed {
    pub fn task(&self) -> &CrawlTask {
        match self {
            Self::Requeued(task) => task,
            Self::Abandoned { task, .. } => task,
        }
    }
}

/// Queue counters at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub visited: usize,
    pub excluded: usize,
}

#[derive(Debug)]
struct Queued {
    task: CrawlTask,
    attempts: u32,
    not_before: Option<Instant>,
}

#[derive(Debug)]
struct CheckedOut {
    task: CrawlTask,
    attempts: u32,
    worker_id: usize,
}

enum Checkout {
    Ready(CrawlTask),
    Later(Instant),
    Waiting,
    Exhausted,
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<Queued>,
    queued: HashSet<String>,
    in_progress: HashMap<String, CheckedOut>,
    visited: HashSet<String>,
    excluded: HashSet<String>,
    domain_counters: HashMap<String, usize>,
    closed: bool,
    stopped: bool,
}

impl Inner {
    fn accepted(&self) -> usize {
        self.queued.len() + self.in_progress.len() + self.visited.len() + self.excluded.len()
    }

    fn is_seen(&self, fingerprint: &str) -> bool {
        self.queued.contains(fingerprint)
            || self.in_progress.contains_key(fingerprint)
            || self.visited.contains(fingerprint)
            || self.excluded.contains(fingerprint)
    }

    fn admit(&mut self, task: CrawlTask, limits: &FrontierLimits) -> Result<(), Rejection> {
        if self.closed {
            return Err(Rejection::Closed);
        }
        if task.depth > limits.max_depth {
            return Err(Rejection::TooDeep);
        }
        let in_scope = extract_domain(&task.url).is_some_and(|d| limits.scope.allows(&d));
        if !in_scope {
            return Err(Rejection::OutOfScope);
        }
        if self.is_seen(&task.fingerprint) {
            return Err(Rejection::Duplicate);
        }
        if self.accepted() >= limits.max_pages {
            return Err(Rejection::PageBudget);
        }

        let host = host_key(&task.url).unwrap_or_default();
        let count = self.domain_counters.get(&host).copied().unwrap_or(0);
        if limits.max_pages_per_domain.is_some_and(|cap| count >= cap) {
            return Err(Rejection::DomainBudget);
        }

        self.domain_counters.insert(host, count + 1);
        self.queued.insert(task.fingerprint.clone());
        self.pending.push_back(Queued {
            task,
            attempts: 0,
            not_before: None,
        });
        Ok(())
    }

    fn checkout(&mut self, worker_id: usize, now: Instant) -> Checkout {
        let mut earliest: Option<Instant> = None;
        let mut ready = None;

        for (i, queued) in self.pending.iter().enumerate() {
            match queued.not_before {
                Some(at) if at > now => {
                    earliest = Some(earliest.map_or(at, |e| e.min(at)));
                }
                _ => {
                    ready = Some(i);
                    break;
                }
            }
        }

        if let Some(queued) = ready.and_then(|i| self.pending.remove(i)) {
            let task = queued.task;
            self.queued.remove(&task.fingerprint);
            self.in_progress.insert(
                task.fingerprint.clone(),
                CheckedOut {
                    task: task.clone(),
                    attempts: queued.attempts + 1,
                    worker_id,
                },
            );
            return Checkout::Ready(task);
        }

        match earliest {
            Some(at) => Checkout::Later(at),
            None if self.in_progress.is_empty() => Checkout::Exhausted,
            None => Checkout::Waiting,
        }
    }

    fn requeue_front(&mut self, task: CrawlTask, attempts: u32) {
        self.queued.insert(task.fingerprint.clone());
        self.pending.push_front(Queued {
            task,
            attempts,
            not_before: None,
        });
    }
}

/// The shared URL frontier of one crawl run
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<Inner>,
    available: Notify,
    halted: Notify,
    limits: FrontierLimits,
    retry: RetryPolicy,
}

impl Frontier {
    pub fn new(limits: FrontierLimits, retry: RetryPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: Notify::new(),
            halted: Notify::new(),
            limits,
            retry,
        }
    }

    /// Builds a frontier configured from a crawl run configuration
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(FrontierLimits::from_config(config), config.retry.clone())
    }

    /// Rebuilds a frontier from persisted state
    ///
    /// `state` is expected in checkpoint form; any `in_progress` fingerprints have no
    /// task attached and are dropped.
    pub fn restore(limits: FrontierLimits, retry: RetryPolicy, state: FrontierState) -> Self {
        if !state.in_progress.is_empty() {
            warn!(
                "Dropping {} in-progress fingerprints without tasks from restored state",
                state.in_progress.len()
            );
        }

        let mut inner = Inner {
            visited: state.visited,
            excluded: state.excluded,
            domain_counters: state.domain_counters,
            ..Inner::default()
        };
        for pending in state.pending {
            if inner.is_seen(&pending.task.fingerprint) {
                continue;
            }
            inner.queued.insert(pending.task.fingerprint.clone());
            inner.pending.push_back(Queued {
                task: pending.task,
                attempts: pending.attempts,
                not_before: None,
            });
        }

        Self {
            inner: Mutex::new(inner),
            available: Notify::new(),
            halted: Notify::new(),
            limits,
            retry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds depth-0 tasks for the given URIs
    ///
    /// Malformed URIs are logged and dropped. Returns how many were accepted.
    pub fn seed<I, S>(&self, uris: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut accepted = 0;
        for uri in uris {
            let uri = uri.as_ref();
            match CrawlTask::seed(uri) {
                Ok(task) => {
                    if self.offer(task) {
                        accepted += 1;
                    }
                }
                Err(e) => warn!("Dropping malformed seed '{}': {}", uri, e),
            }
        }
        accepted
    }

    /// Adds a task if it passes every admission check
    pub fn offer(&self, task: CrawlTask) -> bool {
        match self.try_offer(task) {
            Ok(()) => true,
            Err(reason) => {
                trace!("Offer rejected: {:?}", reason);
                false
            }
        }
    }

    /// Like [`Frontier::offer`], but reports why a task was rejected
    pub fn try_offer(&self, task: CrawlTask) -> Result<(), Rejection> {
        self.lock().admit(task, &self.limits)?;
        self.available.notify_waiters();
        Ok(())
    }

    /// Waits for the next task to fetch
    ///
    /// Returns [`Take::Done`] once there is no pending and no in-progress work, or
    /// after [`Frontier::stop`]. The dequeue and the move to in-progress happen under
    /// one lock acquisition.
    pub async fn take(&self, worker_id: usize) -> Take {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent notify_waiters is not lost
            notified.as_mut().enable();

            let deadline = {
                let mut inner = self.lock();
                if inner.stopped {
                    return Take::Done;
                }
                match inner.checkout(worker_id, Instant::now()) {
                    Checkout::Ready(task) => {
                        trace!("Worker {} took {}", worker_id, task.url);
                        return Take::Task(task);
                    }
                    Checkout::Later(at) => Some(at),
                    Checkout::Waiting => None,
                    Checkout::Exhausted => {
                        inner.closed = true;
                        drop(inner);
                        self.available.notify_waiters();
                        return Take::Done;
                    }
                }
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Reports the outcome of a checked-out task
    ///
    /// Retryable outcomes go back into `pending` while the retry budget lasts. Everything
    /// else settles the task: robots skips into `excluded`, the rest into `visited`.
    pub fn complete(&self, task: &CrawlTask, outcome: &CrawlOutcome) -> Completion {
        let completion = {
            let mut inner = self.lock();
            let Some(entry) = inner.in_progress.remove(&task.fingerprint) else {
                return Completion::Untracked;
            };

            if self.retry.should_retry(entry.attempts, outcome) {
                let not_before = Instant::now() + self.retry.min_redelay;
                let attempt = entry.attempts + 1;
                inner.queued.insert(entry.task.fingerprint.clone());
                inner.pending.push_back(Queued {
                    task: entry.task,
                    attempts: entry.attempts,
                    not_before: Some(not_before),
                });
                Completion::Retried {
                    attempt,
                    not_before,
                }
            } else {
                if outcome.is_skipped() {
                    inner.excluded.insert(entry.task.fingerprint);
                } else {
                    inner.visited.insert(entry.task.fingerprint);
                }
                Completion::Finished {
                    attempts: entry.attempts,
                }
            }
        };

        self.available.notify_waiters();
        completion
    }

    /// Takes back every task checked out by `worker_id`
    ///
    /// Used when a worker dies mid-task. The crash counts as an attempt: a task with
    /// attempts left goes back to the front of `pending`, one without is settled in
    /// `visited` and reported as [`Reclaimed::Abandoned`].
    pub fn requeue_worker(&self, worker_id: usize) -> Vec<Reclaimed> {
        let reclaimed: Vec<Reclaimed> = {
            let mut inner = self.lock();
            let owned: Vec<String> = inner
                .in_progress
                .iter()
                .filter(|(_, entry)| entry.worker_id == worker_id)
                .map(|(fp, _)| fp.clone())
                .collect();

            let mut tasks = Vec::with_capacity(owned.len());
            for fp in owned {
                let Some(entry) = inner.in_progress.remove(&fp) else {
                    continue;
                };
                if self.retry.has_attempts_left(entry.attempts) {
                    tasks.push(Reclaimed::Requeued(entry.task.clone()));
                    inner.requeue_front(entry.task, entry.attempts);
                } else {
                    inner.visited.insert(fp);
                    tasks.push(Reclaimed::Abandoned {
                        task: entry.task,
                        attempts: entry.attempts,
                    });
                }
            }
            tasks
        };

        if !reclaimed.is_empty() {
            debug!(
                "Reclaimed {} task(s) from worker {}",
                reclaimed.len(),
                worker_id
            );
            self.available.notify_waiters();
        }
        reclaimed
    }

    /// Puts a checked-out task back at the front of `pending` without counting the
    /// attempt, e.g. when a worker gives it up on stop before fetching
    ///
    /// Returns false if the task was not checked out.
    pub fn release(&self, task: &CrawlTask) -> bool {
        let released = {
            let mut inner = self.lock();
            match inner.in_progress.remove(&task.fingerprint) {
                Some(entry) => {
                    inner.requeue_front(entry.task, entry.attempts.saturating_sub(1));
                    true
                }
                None => false,
            }
        };

        if released {
            self.available.notify_waiters();
        }
        released
    }

    /// Stops accepting offers; queued work is still handed out
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    /// Cooperative stop: every current and future [`Frontier::take`] returns `Done`
    ///
    /// Offers are still accepted so links found by in-flight fetches reach the next
    /// checkpoint.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.available.notify_waiters();
        self.halted.notify_waiters();
    }

    /// Resolves once [`Frontier::stop`] has been called
    pub async fn stopped(&self) {
        loop {
            let notified = self.halted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// True when there is no pending and no in-progress work
    pub fn is_exhausted(&self) -> bool {
        let inner = self.lock();
        inner.pending.is_empty() && inner.in_progress.is_empty()
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> FrontierCounts {
        let inner = self.lock();
        FrontierCounts {
            pending: inner.pending.len(),
            in_progress: inner.in_progress.len(),
            visited: inner.visited.len(),
            excluded: inner.excluded.len(),
        }
    }

    /// Exact copy of the current state, including in-progress fingerprints
    pub fn snapshot(&self) -> FrontierState {
        let inner = self.lock();
        FrontierState {
            pending: inner
                .pending
                .iter()
                .map(|q| PendingTask {
                    task: q.task.clone(),
                    attempts: q.attempts,
                })
                .collect(),
            in_progress: inner.in_progress.keys().cloned().collect(),
            visited: inner.visited.clone(),
            excluded: inner.excluded.clone(),
            domain_counters: inner.domain_counters.clone(),
        }
    }

    /// State suitable for persisting: checked-out tasks are folded back into the
    /// front of `pending` so a checkpoint never loses them
    pub fn checkpoint(&self) -> FrontierState {
        let inner = self.lock();

        let mut checked_out: Vec<&CheckedOut> = inner.in_progress.values().collect();
        checked_out.sort_by_key(|entry| entry.task.discovered_at);

        let pending = checked_out
            .into_iter()
            .map(|entry| PendingTask {
                task: entry.task.clone(),
                attempts: entry.attempts.saturating_sub(1),
            })
            .chain(inner.pending.iter().map(|q| PendingTask {
                task: q.task.clone(),
                attempts: q.attempts,
            }))
            .collect();

        FrontierState {
            pending,
            in_progress: HashSet::new(),
            visited: inner.visited.clone(),
            excluded: inner.excluded.clone(),
            domain_counters: inner.domain_counters.clone(),
        }
    }
}
