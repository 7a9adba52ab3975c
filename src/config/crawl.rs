//! The immutable, validated configuration of one crawl run

use crate::config::types::Config;
use crate::frontier::RetryPolicy;
use crate::url::DomainScope;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

/// Everything a [`crate::CrawlController`] needs for one run
///
/// Built from a configuration file with [`CrawlConfig::from_file_config`] or
/// programmatically with [`CrawlConfig::new`] followed by field updates. The
/// controller validates it once at construction and never mutates it afterwards.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Seed URIs, depth 0
    pub seeds: Vec<String>,
    pub max_pages_to_fetch: usize,
    pub max_depth: u32,
    pub politeness_delay: Duration,
    /// Upper bound on how far a robots.txt `Crawl-delay` may raise a host's delay
    pub max_crawl_delay: Duration,
    pub thread_pool_size: usize,
    pub storage_folder: PathBuf,
    pub resumable: bool,
    pub allowed_domains: DomainScope,
    pub max_pages_per_domain: Option<usize>,
    pub request_timeout: Duration,
    pub max_redirects: usize,
    pub worker_restart_budget: usize,
    pub retry: RetryPolicy,
    /// Value of the User-Agent header
    pub user_agent: String,
    /// Token matched against robots.txt `User-agent` groups
    pub robots_agent: String,
    pub checkpoint_interval: Duration,
    pub robots_ttl: Duration,
}

impl CrawlConfig {
    /// Creates a configuration with conservative defaults for the given seeds
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            max_pages_to_fetch: 1_000,
            max_depth: 3,
            politeness_delay: Duration::from_millis(1_000),
            max_crawl_delay: Duration::from_secs(60),
            thread_pool_size: 8,
            storage_folder: PathBuf::from("./crawl-state"),
            resumable: false,
            allowed_domains: DomainScope::default(),
            max_pages_per_domain: None,
            request_timeout: Duration::from_secs(30),
            max_redirects: 5,
            worker_restart_budget: 3,
            retry: RetryPolicy::default(),
            user_agent: format!("RippleCrawl/{}", env!("CARGO_PKG_VERSION")),
            robots_agent: "RippleCrawl".to_string(),
            checkpoint_interval: Duration::from_secs(30),
            robots_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Converts a loaded configuration file into a run configuration
    ///
    /// Endpoint entries are composed into seed URIs after the plain seeds.
    pub fn from_file_config(config: &Config) -> Self {
        let mut seeds: Vec<String> = config.seeds.iter().map(|s| s.url.clone()).collect();
        seeds.extend(config.endpoints.iter().map(|e| e.base_uri()));

        let crawler = &config.crawler;
        let retry = &config.retry;

        Self {
            seeds,
            max_pages_to_fetch: crawler.max_pages_to_fetch,
            max_depth: crawler.max_depth,
            politeness_delay: Duration::from_millis(crawler.politeness_delay_ms),
            max_crawl_delay: Duration::from_millis(crawler.max_crawl_delay_ms),
            thread_pool_size: crawler.thread_pool_size,
            storage_folder: PathBuf::from(&config.storage.folder),
            resumable: config.storage.resumable,
            allowed_domains: DomainScope::new(&config.allowed_domains),
            max_pages_per_domain: crawler.max_pages_per_domain,
            request_timeout: Duration::from_millis(crawler.request_timeout_ms),
            max_redirects: crawler.max_redirects,
            worker_restart_budget: crawler.worker_restart_budget,
            retry: RetryPolicy {
                max_retries: retry.max_retries,
                min_redelay: Duration::from_millis(retry.min_redelay_ms),
                retry_statuses: retry.retry_statuses.clone(),
            },
            user_agent: config.user_agent.header_value(),
            robots_agent: config.user_agent.crawler_name.clone(),
            checkpoint_interval: Duration::from_secs(config.storage.checkpoint_interval_secs),
            robots_ttl: Duration::from_secs(config.storage.robots_ttl_secs),
        }
    }

    /// Checks the invariants the engine relies on
    ///
    /// Runs before any worker is spawned; a failure aborts the run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_pool_size < 1 || self.thread_pool_size > 256 {
            return Err(ConfigError::Validation(format!(
                "thread_pool_size must be between 1 and 256, got {}",
                self.thread_pool_size
            )));
        }

        if self.max_pages_to_fetch < 1 {
            return Err(ConfigError::Validation(
                "max_pages_to_fetch must be >= 1".to_string(),
            ));
        }

        if self.max_pages_per_domain == Some(0) {
            return Err(ConfigError::Validation(
                "max_pages_per_domain must be >= 1 when set".to_string(),
            ));
        }

        if self.max_depth == u32::MAX {
            return Err(ConfigError::Validation(format!(
                "max_depth must be below {}",
                u32::MAX
            )));
        }

        if self.max_crawl_delay < self.politeness_delay {
            return Err(ConfigError::Validation(format!(
                "max_crawl_delay ({:?}) must be >= politeness_delay ({:?})",
                self.max_crawl_delay, self.politeness_delay
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "request_timeout must be greater than zero".to_string(),
            ));
        }

        if self.max_redirects > 20 {
            return Err(ConfigError::Validation(format!(
                "max_redirects must be <= 20, got {}",
                self.max_redirects
            )));
        }

        if self.resumable && self.storage_folder.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage_folder is required for a resumable crawl".to_string(),
            ));
        }

        if self.resumable && self.checkpoint_interval.is_zero() {
            return Err(ConfigError::Validation(
                "checkpoint_interval must be greater than zero".to_string(),
            ));
        }

        if self.robots_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "robots_agent cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Identity of this crawl run, used to key persisted frontier state
    ///
    /// A SHA-256 over the sorted seed set and the sorted allowed-domain patterns.
    /// Changing either starts a new run instead of resuming the old one.
    pub fn run_key(&self) -> String {
        let mut seeds: Vec<&str> = self.seeds.iter().map(|s| s.trim()).collect();
        seeds.sort_unstable();
        seeds.dedup();

        let mut domains: Vec<&str> = self
            .allowed_domains
            .patterns()
            .iter()
            .map(String::as_str)
            .collect();
        domains.sort_unstable();

        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(b"seed:");
            hasher.update(seed.as_bytes());
            hasher.update(b"\n");
        }
        for domain in domains {
            hasher.update(b"domain:");
            hasher.update(domain.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CrawlConfig::new(["https://example.test/"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = CrawlConfig::new(["https://example.test/"]);
        config.thread_pool_size = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn test_rejects_zero_page_budget() {
        let mut config = CrawlConfig::new(["https://example.test/"]);
        config.max_pages_to_fetch = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = CrawlConfig::new(["https://example.test/"]);
        config.request_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_depth() {
        let mut config = CrawlConfig::new(["https://example.test/"]);
        config.max_depth = u32::MAX;
        assert!(config.validate().is_err());

        config.max_depth = u32::MAX - 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_crawl_delay_ceiling_below_politeness_delay() {
        let mut config = CrawlConfig::new(["https://example.test/"]);
        config.politeness_delay = Duration::from_secs(5);
        config.max_crawl_delay = Duration::from_secs(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_key_ignores_seed_order() {
        let a = CrawlConfig::new(["https://a.test/", "https://b.test/"]);
        let b = CrawlConfig::new(["https://b.test/", "https://a.test/"]);
        assert_eq!(a.run_key(), b.run_key());
        assert_eq!(a.run_key().len(), 64);
    }

    #[test]
    fn test_run_key_changes_with_scope() {
        let a = CrawlConfig::new(["https://a.test/"]);
        let mut b = a.clone();
        b.allowed_domains = DomainScope::new(["a.test"]);
        assert_ne!(a.run_key(), b.run_key());
    }
}
