//! Per-host robots.txt cache with single-flight refresh

use crate::crawler::PageFetcher;
use crate::robots::RobotsRules;
use crate::url::{host_key, robots_url};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use url::Url;

/// Answer of [`RobotsFilter::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    /// True when this call fetched robots.txt from the host
    pub fetched: bool,
    /// `Crawl-delay` declared for our agent
    pub crawl_delay: Option<Duration>,
}

type RulesSlot = Arc<AsyncMutex<Option<RobotsRules>>>;

/// Robots exclusion filter of one crawl run
///
/// The first check for a host fetches its robots.txt; later checks read the cached
/// rules until they go stale. Each host has its own slot, and a caller that finds the
/// slot empty or stale refreshes it while holding it, so concurrent misses for one
/// host collapse into a single request.
#[derive(Debug)]
pub struct RobotsFilter {
    fetcher: Arc<PageFetcher>,
    agent: String,
    ttl: Duration,
    hosts: Mutex<HashMap<String, RulesSlot>>,
    fetches: AtomicUsize,
}

impl RobotsFilter {
    /// # Arguments
    ///
    /// * `fetcher` - Fetcher used for robots.txt requests
    /// * `agent` - Token matched against `User-agent` groups
    /// * `ttl` - How long fetched rules stay fresh
    pub fn new(fetcher: Arc<PageFetcher>, agent: impl Into<String>, ttl: Duration) -> Self {
        Self {
            fetcher,
            agent: agent.into(),
            ttl,
            hosts: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    fn slot(&self, host: &str) -> RulesSlot {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(hosts.entry(host.to_string()).or_default())
    }

    /// Checks whether `url` may be fetched, refreshing the host's rules if needed
    pub async fn check(&self, url: &Url) -> RobotsVerdict {
        let Some(host) = host_key(url) else {
            return RobotsVerdict {
                allowed: true,
                fetched: false,
                crawl_delay: None,
            };
        };

        let slot = self.slot(&host);
        let mut rules = slot.lock().await;

        let fetched = rules.as_ref().map_or(true, RobotsRules::is_stale);
        if fetched {
            *rules = Some(self.fetch_rules(url, &host).await);
        }

        match rules.as_ref() {
            Some(rules) => RobotsVerdict {
                allowed: rules.is_allowed(url),
                fetched,
                crawl_delay: rules.crawl_delay,
            },
            None => RobotsVerdict {
                allowed: true,
                fetched,
                crawl_delay: None,
            },
        }
    }

    /// Returns true if `url` may be fetched
    pub async fn is_allowed(&self, url: &Url) -> bool {
        self.check(url).await.allowed
    }

    /// The cached rules of a host, without fetching
    pub async fn cached(&self, host: &str) -> Option<RobotsRules> {
        let slot = {
            let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            hosts.get(host).cloned()
        }?;
        let rules = slot.lock().await.clone();
        rules
    }

    /// Number of robots.txt requests made so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Fetches and parses robots.txt; any failure yields allow-all rules
    async fn fetch_rules(&self, url: &Url, host: &str) -> RobotsRules {
        let Some(target) = robots_url(url) else {
            return RobotsRules::allow_all(host, &self.agent, self.ttl);
        };

        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!("Fetching {}", target);

        match self.fetcher.fetch(&target).await {
            Ok(response) if (200..300).contains(&response.status_code) => {
                let rules = RobotsRules::parse(host, &response.body, &self.agent, self.ttl);
                info!(
                    "Loaded robots.txt for {} ({} disallow rules)",
                    host,
                    rules.disallow_patterns.len()
                );
                rules
            }
            Ok(response) => {
                debug!(
                    "robots.txt for {} returned {}; allowing all",
                    host, response.status_code
                );
                RobotsRules::allow_all(host, &self.agent, self.ttl)
            }
            Err(failure) => {
                warn!("Failed to fetch robots.txt for {}: {}; allowing all", host, failure);
                RobotsRules::allow_all(host, &self.agent, self.ttl)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::robots::MAX_CRAWL_DELAY;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_filter(ttl: Duration) -> RobotsFilter {
        let mut config = CrawlConfig::new(["http://example.test/"]);
        config.request_timeout = Duration::from_millis(500);
        let fetcher = Arc::new(PageFetcher::new(&config, None).unwrap());
        RobotsFilter::new(fetcher, "TestBot", ttl)
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn test_disallowed_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /private/\nCrawl-delay: 1"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let filter = create_test_filter(Duration::from_secs(3600));

        let first = filter.check(&url(&server, "/a")).await;
        assert!(first.allowed);
        assert!(first.fetched);
        assert_eq!(first.crawl_delay, Some(Duration::from_secs(1)));

        let second = filter.check(&url(&server, "/private/c")).await;
        assert!(!second.allowed);
        assert!(!second.fetched);
    }

    #[tokio::test]
    async fn test_oversized_crawl_delay_is_clamped_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 1e30"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let filter = create_test_filter(Duration::from_secs(3600));
        let first = filter.check(&url(&server, "/a")).await;
        assert!(first.allowed);
        assert_eq!(first.crawl_delay, Some(MAX_CRAWL_DELAY));

        // The rules stay cached, so the next check does not refetch
        let second = filter.check(&url(&server, "/b")).await;
        assert!(!second.fetched);
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let filter = create_test_filter(Duration::from_secs(3600));
        assert!(filter.is_allowed(&url(&server, "/private/c")).await);
        assert!(filter.is_allowed(&url(&server, "/other")).await);

        let host = host_key(&url(&server, "/")).unwrap();
        assert!(filter.cached(&host).await.unwrap().is_allow_all());
    }

    #[tokio::test]
    async fn test_unreachable_host_allows_all() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = Url::parse(&format!("http://127.0.0.1:{}/page", port)).unwrap();

        let filter = create_test_filter(Duration::from_secs(3600));
        let verdict = filter.check(&target).await;
        assert!(verdict.allowed);
        assert!(verdict.fetched);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_fetch_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /private/")
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let filter = Arc::new(create_test_filter(Duration::from_secs(3600)));
        let mut handles = Vec::new();
        for i in 0..8 {
            let filter = Arc::clone(&filter);
            let target = url(&server, &format!("/page/{}", i));
            handles.push(tokio::spawn(async move { filter.check(&target).await }));
        }

        let mut fetched = 0;
        for handle in handles {
            let verdict = handle.await.unwrap();
            assert!(verdict.allowed);
            if verdict.fetched {
                fetched += 1;
            }
        }

        assert_eq!(fetched, 1);
        assert_eq!(filter.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_rules_are_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow:"))
            .expect(2)
            .mount(&server)
            .await;

        let filter = create_test_filter(Duration::ZERO);
        assert!(filter.check(&url(&server, "/a")).await.fetched);
        assert!(filter.check(&url(&server, "/b")).await.fetched);
    }
}
