use serde::Deserialize;

/// Main configuration file structure for Ripple-Crawl
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub crawler: CrawlerSection,
    #[serde(default)]
    pub retry: RetrySection,
    pub user_agent: UserAgentConfig,
    pub storage: StorageSection,
    #[serde(default)]
    pub seeds: Vec<SeedEntry>,
    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerSection {
    /// Upper bound on tasks accepted into the frontier for one run
    pub max_pages_to_fetch: usize,

    /// Maximum depth to crawl from seed URLs
    pub max_depth: u32,

    /// Minimum time between requests to the same host (milliseconds)
    pub politeness_delay_ms: u64,

    /// Ceiling on a robots.txt `Crawl-delay` (milliseconds)
    #[serde(default = "default_max_crawl_delay_ms")]
    pub max_crawl_delay_ms: u64,

    /// Number of concurrent workers
    pub thread_pool_size: usize,

    /// Maximum number of tasks accepted per host
    #[serde(default)]
    pub max_pages_per_domain: Option<usize>,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum redirect hops followed for one fetch
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// How many crashed workers may be replaced during one run
    #[serde(default = "default_worker_restart_budget")]
    pub worker_restart_budget: usize,
}

/// Retry policy for transient failures
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum delay before a retried task may be dequeued again (milliseconds)
    #[serde(default = "default_min_redelay_ms")]
    pub min_redelay_ms: u64,

    /// HTTP status codes that are retried rather than recorded as final
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_redelay_ms: default_min_redelay_ms(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler, also the token matched against robots.txt groups
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{})",
            self.crawler_name, self.crawler_version, self.contact_url
        )
    }
}

/// Storage and resumability configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageSection {
    /// Folder holding the frontier database and run summaries
    pub folder: String,

    #[serde(default)]
    pub resumable: bool,

    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,

    #[serde(default = "default_robots_ttl_secs")]
    pub robots_ttl_secs: u64,
}

/// A plain seed URL
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub url: String,
}

/// A job-style endpoint whose parts compose a seed URL
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EndpointEntry {
    pub protocol: String,
    pub server_url: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub rest_api_loc: String,
}

impl EndpointEntry {
    /// Composes `protocol://server-url[:port]/rest-api-loc`
    pub fn base_uri(&self) -> String {
        let server = self.server_url.trim_end_matches('/');
        let location = self.rest_api_loc.trim_start_matches('/');
        match self.port {
            Some(port) => format!("{}://{}:{}/{}", self.protocol, server, port, location),
            None => format!("{}://{}/{}", self.protocol, server, location),
        }
    }
}

/// Raw credentials as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_crawl_delay_ms() -> u64 {
    60_000
}

fn default_worker_restart_budget() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_min_redelay_ms() -> u64 {
    1_000
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 503]
}

fn default_checkpoint_interval_secs() -> u64 {
    30
}

fn default_robots_ttl_secs() -> u64 {
    24 * 60 * 60
}
