//! Per-host politeness
//!
//! Every host gets one slot. A worker that wants to fetch from a host takes the slot,
//! sleeps until the host's delay has elapsed since the end of the previous fetch, and
//! holds the slot for the duration of its own fetch. Dropping the returned
//! [`PolitenessPermit`] stamps the end of the fetch and lets the next waiter in.
//!
//! The slot is a `tokio::sync::Mutex`, so waiters queue FIFO per host instead of
//! polling. Hosts never block each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Politeness bookkeeping for one host
#[derive(Debug, Clone)]
pub struct HostPoliteness {
    pub host: String,

    /// End of the most recent fetch to this host
    pub last_fetch_at: Option<Instant>,

    /// Minimum gap between the end of one fetch and the start of the next
    pub min_delay: Duration,

    /// Ceiling for [`PolitenessPermit::raise_min_delay`]
    pub max_delay: Duration,

    /// Number of fetches stamped so far
    pub fetch_count: u64,
}

impl HostPoliteness {
    fn new(host: &str, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            host: host.to_string(),
            last_fetch_at: None,
            min_delay,
            max_delay,
            fetch_count: 0,
        }
    }

    /// Earliest instant the next fetch may start, if the host was fetched before
    pub fn ready_at(&self) -> Option<Instant> {
        self.last_fetch_at.map(|last| last + self.min_delay)
    }

    /// Calculates how long a fetch starting at `now` would have to wait
    ///
    /// Returns None if a fetch can start now.
    pub fn time_until_next_fetch(&self, now: Instant) -> Option<Duration> {
        self.ready_at()
            .filter(|ready| *ready > now)
            .map(|ready| ready - now)
    }

    fn stamp(&mut self) {
        self.last_fetch_at = Some(Instant::now());
        self.fetch_count += 1;
    }
}

type HostSlot = Arc<AsyncMutex<HostPoliteness>>;

/// The politeness table of one crawl run
#[derive(Debug)]
pub struct PolitenessGate {
    hosts: Mutex<HashMap<String, HostSlot>>,
    default_delay: Duration,
    max_delay: Duration,
}

impl PolitenessGate {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            default_delay,
            max_delay: Duration::MAX,
        }
    }

    /// Caps how far a host's delay may be raised; never below the default delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.default_delay);
        self
    }

    fn slot(&self, host: &str) -> HostSlot {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(hosts.entry(host.to_string()).or_insert_with(|| {
            trace!("New politeness slot for {}", host);
            Arc::new(AsyncMutex::new(HostPoliteness::new(
                host,
                self.default_delay,
                self.max_delay,
            )))
        }))
    }

    /// Waits until `host` may be fetched and takes its slot
    ///
    /// The slot stays held until the permit is dropped, so fetches to one host never
    /// overlap and always start at least `min_delay` after the previous one ended.
    pub async fn acquire(&self, host: &str) -> PolitenessPermit {
        let guard = self.slot(host).lock_owned().await;

        if let Some(wait) = guard.time_until_next_fetch(Instant::now()) {
            debug!("Waiting {:?} before fetching from {}", wait, host);
        }
        if let Some(ready) = guard.ready_at() {
            tokio::time::sleep_until(ready).await;
        }

        PolitenessPermit {
            guard: Some(guard),
            stamp_on_drop: true,
        }
    }

    /// Current state of a host, or None if it was never acquired
    ///
    /// Waits for the host slot if a worker currently holds it.
    pub async fn host_state(&self, host: &str) -> Option<HostPoliteness> {
        let slot = {
            let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            hosts.get(host).cloned()
        }?;
        let state = slot.lock().await.clone();
        Some(state)
    }

    pub fn host_count(&self) -> usize {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forgets every host; called once a run has finished
    pub fn evict_all(&self) {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Exclusive right to fetch from one host
///
/// Dropping it records the end of the fetch.
#[derive(Debug)]
pub struct PolitenessPermit {
    guard: Option<OwnedMutexGuard<HostPoliteness>>,
    stamp_on_drop: bool,
}

impl PolitenessPermit {
    pub fn host(&self) -> &str {
        self.guard.as_ref().map_or("", |g| g.host.as_str())
    }

    pub fn min_delay(&self) -> Duration {
        self.guard.as_ref().map_or(Duration::ZERO, |g| g.min_delay)
    }

    /// Raises the host delay to at least `delay` (robots.txt `Crawl-delay`)
    ///
    /// Never lowers the delay below what is already configured, and never raises it
    /// past the gate's ceiling.
    pub fn raise_min_delay(&mut self, delay: Duration) {
        if let Some(guard) = self.guard.as_mut() {
            let delay = delay.min(guard.max_delay);
            if delay > guard.min_delay {
                debug!("Raising delay for {} to {:?}", guard.host, delay);
                guard.min_delay = delay;
            }
        }
    }

    /// Records a request that just finished and waits out the delay, keeping the slot
    ///
    /// Used after a robots.txt fetch so the page fetch that follows is still spaced.
    pub async fn pace(&mut self) {
        if let Some(guard) = self.guard.as_mut() {
            guard.stamp();
            let delay = guard.min_delay;
            tokio::time::sleep(delay).await;
        }
    }

    /// Gives the slot back without recording a fetch
    pub fn release_unused(mut self) {
        self.stamp_on_drop = false;
    }
}

impl Drop for PolitenessPermit {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            if self.stamp_on_drop {
                guard.stamp();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        let gate = PolitenessGate::new(Duration::from_millis(500));
        let start = Instant::now();
        let permit = gate.acquire("example.test").await;
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(permit.host(), "example.test");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetches_are_spaced() {
        let delay = Duration::from_millis(100);
        let gate = Arc::new(PolitenessGate::new(delay));
        let windows = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            let windows = Arc::clone(&windows);
            handles.push(tokio::spawn(async move {
                let permit = gate.acquire("example.test").await;
                let start = Instant::now();
                tokio::time::sleep(Duration::from_millis(10)).await;
                let end = Instant::now();
                drop(permit);
                windows.lock().unwrap().push((start, end));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut windows = windows.lock().unwrap().clone();
        windows.sort_by_key(|(start, _)| *start);
        assert_eq!(windows.len(), 4);
        for pair in windows.windows(2) {
            let (_, prev_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start >= prev_end + delay);
        }
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let gate = PolitenessGate::new(Duration::from_secs(5));
        drop(gate.acquire("a.test").await);

        let start = Instant::now();
        let _b = gate.acquire("b.test").await;
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(gate.host_count(), 2);
    }

    #[tokio::test]
    async fn test_release_unused_does_not_stamp() {
        let gate = PolitenessGate::new(Duration::from_secs(5));
        gate.acquire("example.test").await.release_unused();

        let start = Instant::now();
        let _permit = gate.acquire("example.test").await;
        assert!(start.elapsed() < Duration::from_millis(100));

        drop(_permit);
        let state = gate.host_state("example.test").await.unwrap();
        assert_eq!(state.fetch_count, 1);
    }

    #[tokio::test]
    async fn test_raise_min_delay_never_lowers() {
        let gate = PolitenessGate::new(Duration::from_millis(200));
        let mut permit = gate.acquire("example.test").await;
        permit.raise_min_delay(Duration::from_millis(50));
        assert_eq!(permit.min_delay(), Duration::from_millis(200));
        permit.raise_min_delay(Duration::from_millis(300));
        assert_eq!(permit.min_delay(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_raise_min_delay_is_capped() {
        let gate =
            PolitenessGate::new(Duration::from_millis(200)).with_max_delay(Duration::from_secs(2));
        let mut permit = gate.acquire("example.test").await;
        permit.raise_min_delay(Duration::from_secs(3600));
        assert_eq!(permit.min_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_ceiling_never_below_default_delay() {
        let gate =
            PolitenessGate::new(Duration::from_secs(1)).with_max_delay(Duration::from_millis(10));
        assert_eq!(gate.max_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_abandoned_wait_leaves_host_untouched() {
        let gate = PolitenessGate::new(Duration::from_secs(5));
        drop(gate.acquire("example.test").await);

        let waited =
            tokio::time::timeout(Duration::from_millis(50), gate.acquire("example.test")).await;
        assert!(waited.is_err());

        let state = gate.host_state("example.test").await.unwrap();
        assert_eq!(state.fetch_count, 1);
    }

    #[tokio::test]
    async fn test_pace_spaces_follow_up_request() {
        let gate = PolitenessGate::new(Duration::from_millis(80));
        let mut permit = gate.acquire("example.test").await;
        let start = Instant::now();
        permit.pace().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
        drop(permit);

        let state = gate.host_state("example.test").await.unwrap();
        assert_eq!(state.fetch_count, 2);
    }

    #[test]
    fn test_time_until_next_fetch() {
        let mut host = HostPoliteness::new(
            "example.test",
            Duration::from_millis(100),
            Duration::MAX,
        );
        let now = Instant::now();
        assert_eq!(host.time_until_next_fetch(now), None);

        host.last_fetch_at = Some(now);
        let wait = host.time_until_next_fetch(now).unwrap();
        assert_eq!(wait, Duration::from_millis(100));
        assert_eq!(
            host.time_until_next_fetch(now + Duration::from_millis(150)),
            None
        );
    }

    #[tokio::test]
    async fn test_evict_all() {
        let gate = PolitenessGate::new(Duration::from_millis(10));
        drop(gate.acquire("example.test").await);
        gate.evict_all();
        assert_eq!(gate.host_count(), 0);
        assert!(gate.host_state("example.test").await.is_none());
    }
}
