//! Crawl controller - orchestration of one crawl run
//!
//! This module owns everything a run shares between its workers:
//! - The frontier, politeness gate, robots filter and fetcher
//! - The worker pool and its supervisor, which replaces crashed workers
//! - Periodic and final frontier checkpoints for resumable runs
//! - The run's phase machine and the final report

use crate::config::{CrawlConfig, Credentials};
use crate::crawler::worker::{run_worker, WorkerContext, WorkerData};
use crate::crawler::{FailureKind, HtmlLinkExtractor, LinkExtractor, PageFetcher};
use crate::frontier::{
    CrawlOutcome, CrawlResult, CrawlTask, Frontier, FrontierCounts, FrontierLimits, Reclaimed,
};
use crate::output::CrawlSummary;
use crate::politeness::PolitenessGate;
use crate::robots::RobotsFilter;
use crate::storage::{
    FrontierStore, MemorySink, ResultSink, RunStatus, SqliteStorage, DATABASE_FILE,
};
use crate::{CrawlError, Result};
use chrono::Utc;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Lifecycle of a crawl run
///
/// `Created → Seeded → Running → Draining → Finished`. No transition skips a phase and
/// `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    Created,
    Seeded,
    Running,
    Draining,
    Finished,
}

impl CrawlPhase {
    pub fn can_transition_to(self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;
        matches!(
            (self, next),
            (Created, Seeded)
                | (Seeded, Seeded)
                | (Seeded, Running)
                | (Running, Draining)
                | (Draining, Finished)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Seeded => "seeded",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a finished run hands back
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub phase: CrawlPhase,
    pub run_key: String,
    /// Frontier counters at the end of the run
    pub frontier: FrontierCounts,
    pub summary: CrawlSummary,
    /// Local data of every worker, by worker id
    pub workers: Vec<WorkerData>,
    /// Workers that crashed during the run
    pub crashed_workers: usize,
}

impl CrawlReport {
    /// True when the frontier ran dry, as opposed to a stop or a worker shortage
    pub fn is_complete(&self) -> bool {
        self.frontier.pending == 0 && self.frontier.in_progress == 0
    }
}

type CustomData = Arc<dyn Any + Send + Sync>;

struct Shared {
    config: CrawlConfig,
    run_key: String,
    frontier: Arc<Frontier>,
    politeness: Arc<PolitenessGate>,
    robots: Arc<RobotsFilter>,
    fetcher: Arc<PageFetcher>,
    extractor: Arc<dyn LinkExtractor>,
    sink: Arc<dyn ResultSink>,
    store: Option<Arc<dyn FrontierStore>>,
    phase: Mutex<CrawlPhase>,
    worker_data: Vec<Arc<Mutex<WorkerData>>>,
    custom_data: Mutex<Option<CustomData>>,
}

impl Shared {
    fn phase(&self) -> MutexGuard<'_, CrawlPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: CrawlPhase) -> Result<()> {
        let mut phase = self.phase();
        if !phase.can_transition_to(to) {
            return Err(CrawlError::InvalidTransition { from: *phase, to });
        }
        if *phase != to {
            info!("Crawl phase {} -> {}", *phase, to);
        }
        *phase = to;
        Ok(())
    }

    /// Running → Draining, once; later calls are no-ops
    ///
    /// After a stop the frontier stays open so in-flight fetches can still hand over
    /// their links for the final checkpoint.
    fn begin_draining(&self) {
        let mut phase = self.phase();
        if *phase == CrawlPhase::Running {
            info!("Crawl phase {} -> {}", *phase, CrawlPhase::Draining);
            *phase = CrawlPhase::Draining;
            drop(phase);
            if !self.frontier.is_stopped() {
                self.frontier.close();
            }
        }
    }

    fn worker_context(&self) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            frontier: Arc::clone(&self.frontier),
            politeness: Arc::clone(&self.politeness),
            robots: Arc::clone(&self.robots),
            fetcher: Arc::clone(&self.fetcher),
            extractor: Arc::clone(&self.extractor),
            sink: Arc::clone(&self.sink),
        })
    }

    /// Stores the terminal result of a task whose worker crashed on its last attempt
    fn record_crash(&self, worker_id: usize, task: CrawlTask, attempts: u32, reason: &str) {
        let result = CrawlResult {
            task,
            outcome: CrawlOutcome::Failure {
                kind: FailureKind::WorkerCrash,
                message: reason.to_string(),
            },
            attempts,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.sink.store(&result) {
            warn!("Failed to store result for {}: {}", result.task.url, e);
        }
        self.worker_data[worker_id]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .results
            .push(result);
    }

    fn collect_worker_data(&self) -> Vec<WorkerData> {
        self.worker_data
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    async fn checkpoint(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let state = self.frontier.checkpoint();
        let run_key = self.run_key.clone();
        let pending = state.pending.len();

        match tokio::task::spawn_blocking(move || store.save_state(&run_key, &state)).await {
            Ok(Ok(())) => debug!("Checkpointed frontier ({} pending)", pending),
            Ok(Err(e)) => warn!("Frontier checkpoint failed: {}", e),
            Err(e) => warn!("Frontier checkpoint task failed: {}", e),
        }
    }

    fn mark_run(&self, status: RunStatus) {
        if let Some(store) = &self.store {
            if let Err(e) = store.mark_run(&self.run_key, status) {
                warn!("Failed to record run status {:?}: {}", status, e);
            }
        }
    }
}

/// Builder for a [`CrawlController`]
pub struct CrawlControllerBuilder {
    config: CrawlConfig,
    link_extractor: Option<Arc<dyn LinkExtractor>>,
    result_sink: Option<Arc<dyn ResultSink>>,
    credentials: Option<Credentials>,
    custom_data: Option<CustomData>,
}

impl CrawlControllerBuilder {
    /// Replaces the default [`HtmlLinkExtractor`]
    pub fn link_extractor(mut self, extractor: Arc<dyn LinkExtractor>) -> Self {
        self.link_extractor = Some(extractor);
        self
    }

    /// Replaces the default result sink
    pub fn result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.result_sink = Some(sink);
        self
    }

    /// Basic auth credentials for every page fetch
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn custom_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.custom_data = Some(Arc::new(data));
        self
    }

    /// Validates the configuration and assembles the run
    ///
    /// For a resumable run this opens `<storage-folder>/frontier.db` and restores the
    /// frontier persisted under the run key, if any. Errors here abort the run before
    /// any worker exists.
    pub fn build(self) -> Result<CrawlController> {
        let config = self.config;
        config.validate()?;

        let run_key = config.run_key();
        let limits = FrontierLimits::from_config(&config);

        let mut storage: Option<Arc<SqliteStorage>> = None;
        let mut restored = None;
        if config.resumable {
            std::fs::create_dir_all(&config.storage_folder).map_err(|source| {
                CrawlError::StorageFolder {
                    path: config.storage_folder.display().to_string(),
                    source,
                }
            })?;
            let sqlite = Arc::new(SqliteStorage::new(
                &config.storage_folder.join(DATABASE_FILE),
            )?);
            restored = sqlite.load_state(&run_key)?;
            storage = Some(sqlite);
        }

        let frontier = match restored {
            Some(state) => {
                info!(
                    "Resuming run {}: {} pending, {} visited",
                    short_key(&run_key),
                    state.pending.len(),
                    state.visited.len()
                );
                Frontier::restore(limits, config.retry.clone(), state)
            }
            None => Frontier::new(limits, config.retry.clone()),
        };
        let phase = if frontier.is_empty() {
            CrawlPhase::Created
        } else {
            CrawlPhase::Seeded
        };

        let sink: Arc<dyn ResultSink> = match (self.result_sink, &storage) {
            (Some(sink), _) => sink,
            (None, Some(sqlite)) => Arc::new(sqlite.result_sink(run_key.clone())),
            (None, None) => Arc::new(MemorySink::new()),
        };
        let store = storage.map(|s| s as Arc<dyn FrontierStore>);

        let fetcher = Arc::new(PageFetcher::new(&config, self.credentials)?);
        let robots = Arc::new(RobotsFilter::new(
            Arc::clone(&fetcher),
            config.robots_agent.clone(),
            config.robots_ttl,
        ));
        let politeness = Arc::new(
            PolitenessGate::new(config.politeness_delay).with_max_delay(config.max_crawl_delay),
        );
        let worker_data = (0..config.thread_pool_size)
            .map(|id| Arc::new(Mutex::new(WorkerData::new(id))))
            .collect();

        Ok(CrawlController {
            shared: Arc::new(Shared {
                run_key,
                frontier: Arc::new(frontier),
                politeness,
                robots,
                fetcher,
                extractor: self
                    .link_extractor
                    .unwrap_or_else(|| Arc::new(HtmlLinkExtractor)),
                sink,
                store,
                phase: Mutex::new(phase),
                worker_data,
                custom_data: Mutex::new(self.custom_data),
                config,
            }),
            supervisor: Mutex::new(None),
            report: Mutex::new(None),
        })
    }
}

/// Orchestrates one crawl run
///
/// ```no_run
/// use ripple_crawl::{CrawlConfig, CrawlController};
///
/// # async fn run() -> ripple_crawl::Result<()> {
/// let config = CrawlConfig::new(["https://example.com/"]);
/// let controller = CrawlController::new(config)?;
/// controller.seed()?;
/// controller.start()?;
/// let report = controller.wait_until_finish().await?;
/// println!("fetched {} pages", report.summary.fetched);
/// # Ok(())
/// # }
/// ```
pub struct CrawlController {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<(usize, Duration)>>>,
    report: Mutex<Option<CrawlReport>>,
}

impl CrawlController {
    pub fn builder(config: CrawlConfig) -> CrawlControllerBuilder {
        CrawlControllerBuilder {
            config,
            link_extractor: None,
            result_sink: None,
            credentials: None,
            custom_data: None,
        }
    }

    /// A controller with the default extractor and sink
    pub fn new(config: CrawlConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn phase(&self) -> CrawlPhase {
        *self.shared.phase()
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.shared.config
    }

    /// Identity of this run, see [`CrawlConfig::run_key`]
    pub fn run_key(&self) -> &str {
        &self.shared.run_key
    }

    pub fn frontier(&self) -> &Frontier {
        &self.shared.frontier
    }

    /// Offers every configured seed; moves the run to `Seeded`
    ///
    /// Seeds already known to a restored frontier are ignored.
    pub fn seed(&self) -> Result<usize> {
        self.shared.transition(CrawlPhase::Seeded)?;
        let accepted = self.shared.frontier.seed(&self.shared.config.seeds);
        info!(
            "Seeded {} of {} URIs ({} pending)",
            accepted,
            self.shared.config.seeds.len(),
            self.shared.frontier.len()
        );
        Ok(accepted)
    }

    /// Offers one extra seed; moves the run to `Seeded`
    pub fn add_seed(&self, uri: &str) -> Result<bool> {
        self.shared.transition(CrawlPhase::Seeded)?;
        Ok(self.shared.frontier.seed([uri]) == 1)
    }

    /// Spawns the worker pool; `Seeded → Running`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.shared.transition(CrawlPhase::Running)?;
        self.shared.mark_run(RunStatus::Running);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(supervise(shared));
        *self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Cooperative stop
    ///
    /// Workers finish their current task and exit; the run still drains and writes a
    /// final checkpoint.
    pub fn stop(&self) {
        info!("Stop requested");
        self.shared.frontier.stop();
    }

    /// Waits until the run reaches `Finished` and returns its report
    ///
    /// Calling it again returns the same report.
    pub async fn wait_until_finish(&self) -> Result<CrawlReport> {
        if let Some(report) = self.report_lock().clone() {
            return Ok(report);
        }

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Err(CrawlError::InvalidTransition {
                from: self.phase(),
                to: CrawlPhase::Finished,
            });
        };

        let (crashed_workers, elapsed) = handle
            .await
            .map_err(|e| CrawlError::Supervisor(e.to_string()))?;

        let workers = self.shared.collect_worker_data();
        let report = CrawlReport {
            phase: self.phase(),
            run_key: self.shared.run_key.clone(),
            frontier: self.shared.frontier.counts(),
            summary: CrawlSummary::from_workers(&workers, elapsed),
            workers,
            crashed_workers,
        };
        *self.report_lock() = Some(report.clone());
        Ok(report)
    }

    /// Seeds, starts and waits in one call
    pub async fn run(&self) -> Result<CrawlReport> {
        self.seed()?;
        self.start()?;
        self.wait_until_finish().await
    }

    /// Current local data of every worker
    pub fn crawlers_local_data(&self) -> Vec<WorkerData> {
        self.shared.collect_worker_data()
    }

    /// Stores an opaque per-run value, replacing any previous one
    pub fn set_custom_data<T: Any + Send + Sync>(&self, data: T) {
        *self
            .shared
            .custom_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(data));
    }

    /// The per-run value, if one of type `T` is set
    pub fn custom_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self
            .shared
            .custom_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        data.downcast::<T>().ok()
    }

    fn report_lock(&self) -> MutexGuard<'_, Option<CrawlReport>> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn short_key(run_key: &str) -> &str {
    run_key.get(..12).unwrap_or(run_key)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn spawn_worker(
    workers: &mut JoinSet<(usize, std::result::Result<(), tokio::task::JoinError>)>,
    shared: &Shared,
    ctx: &Arc<WorkerContext>,
    worker_id: usize,
) {
    let inner = tokio::spawn(run_worker(
        worker_id,
        Arc::clone(ctx),
        Arc::clone(&shared.worker_data[worker_id]),
    ));
    // The outer task reports which worker ended, even when the inner one panicked
    workers.spawn(async move { (worker_id, inner.await) });
}

/// Owns the worker pool until every worker has exited, then finishes the run
///
/// Returns the number of workers that crashed and the run's wall time.
async fn supervise(shared: Arc<Shared>) -> (usize, Duration) {
    let started = Instant::now();
    let ctx = shared.worker_context();
    let pool_size = shared.config.thread_pool_size;
    info!(
        "Starting {} workers for run {}",
        pool_size,
        short_key(&shared.run_key)
    );

    let mut workers = JoinSet::new();
    for worker_id in 0..pool_size {
        spawn_worker(&mut workers, &shared, &ctx, worker_id);
    }

    let checkpointer = shared.store.is_some().then(|| {
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.config.checkpoint_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                shared.checkpoint().await;
            }
        })
    });

    let mut restarts_left = shared.config.worker_restart_budget;
    let mut crashed = 0;

    while let Some(joined) = workers.join_next().await {
        let (worker_id, exit) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                error!("Lost track of a worker: {}", e);
                continue;
            }
        };

        match exit {
            Ok(()) => shared.begin_draining(),
            Err(e) => {
                crashed += 1;
                let reclaimed = shared.frontier.requeue_worker(worker_id);
                let reason = if e.is_panic() {
                    panic_message(&*e.into_panic())
                } else {
                    e.to_string()
                };
                let task = reclaimed
                    .first()
                    .map(|r| r.task().url.to_string())
                    .unwrap_or_else(|| "-".to_string());
                error!(
                    "Worker {} crashed while processing {}: {}",
                    worker_id, task, reason
                );

                for entry in reclaimed {
                    if let Reclaimed::Abandoned { task, attempts } = entry {
                        warn!(
                            "Giving up on {} after {} attempt(s) crashed a worker",
                            task.url, attempts
                        );
                        shared.record_crash(worker_id, task, attempts, &reason);
                    }
                }

                if shared.frontier.is_stopped() {
                    continue;
                }
                if restarts_left > 0 {
                    restarts_left -= 1;
                    info!(
                        "Restarting worker {} ({} restarts left)",
                        worker_id, restarts_left
                    );
                    spawn_worker(&mut workers, &shared, &ctx, worker_id);
                } else {
                    warn!(
                        "Worker restart budget exhausted; pool continues with {} of {} workers",
                        workers.len(),
                        pool_size
                    );
                }
            }
        }
    }

    if let Some(handle) = checkpointer {
        handle.abort();
    }

    // Every worker may have crashed without any clean exit
    shared.begin_draining();
    shared.checkpoint().await;

    let status = if shared.frontier.is_exhausted() {
        RunStatus::Completed
    } else {
        RunStatus::Interrupted
    };
    shared.mark_run(status);
    shared.politeness.evict_all();

    if let Err(e) = shared.transition(CrawlPhase::Finished) {
        warn!("{}", e);
    }

    let elapsed = started.elapsed();
    let counts = shared.frontier.counts();
    info!(
        "Run {} finished in {:.1?}: {} visited, {} excluded, {} pending",
        short_key(&shared.run_key),
        elapsed,
        counts.visited,
        counts.excluded,
        counts.pending
    );

    (crashed, elapsed)
}
