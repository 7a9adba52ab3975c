//! HTTP fetcher implementation
//!
//! This module performs the network side of a crawl:
//! - Building the HTTP client with the configured user agent and timeouts
//! - GET requests with optional basic authentication
//! - Manual redirect handling with loop detection
//! - Classification of transport failures
//!
//! The fetcher never touches frontier or politeness state. Any HTTP response,
//! including 4xx and 5xx, is a successful fetch at this layer.

use crate::config::{CrawlConfig, Credentials};
use reqwest::{header, redirect::Policy, Client};
use std::collections::HashSet;
use std::error::Error as _;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Kind of transport-level fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Dns,
    ConnectionRefused,
    Timeout,
    TooManyRedirects,
    MalformedUri,
    /// The response started but its body could not be read
    Body,
    /// The worker processing the task panicked on every attempt
    WorkerCrash,
    Other,
}

impl FailureKind {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MalformedUri | Self::WorkerCrash)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::ConnectionRefused => "connection_refused",
            Self::Timeout => "timeout",
            Self::TooManyRedirects => "too_many_redirects",
            Self::MalformedUri => "malformed_uri",
            Self::Body => "body",
            Self::WorkerCrash => "worker_crash",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed fetch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies a reqwest error
    fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = error_chain(err);
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() {
            let lower = message.to_lowercase();
            if lower.contains("dns") || lower.contains("lookup") || lower.contains("resolve") {
                FailureKind::Dns
            } else {
                FailureKind::ConnectionRefused
            }
        } else if err.is_builder() {
            FailureKind::MalformedUri
        } else if err.is_body() || err.is_decode() {
            FailureKind::Body
        } else {
            FailureKind::Other
        };
        Self { kind, message }
    }
}

/// Joins an error with its sources, since reqwest keeps the useful part in the chain
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// A response received from a server
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status_code: u16,
    pub content_type: Option<String>,
    /// Body decoded as lossy UTF-8
    pub body: String,
    /// URL the body came from, after redirects
    pub final_url: Url,
    /// URLs that answered with a redirect, in order
    pub redirect_chain: Vec<Url>,
}

impl FetchResponse {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(false, |ct| ct.to_lowercase().contains("text/html"))
    }
}

/// Builds an HTTP client with the run's user agent and timeouts
///
/// Redirects are disabled at the client level; [`PageFetcher`] follows them itself.
pub fn build_http_client(config: &CrawlConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout)
        .connect_timeout(config.request_timeout.min(Duration::from_secs(10)))
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true)
        .build()
}

/// Performs page fetches for one crawl run
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    max_redirects: usize,
    credentials: Option<Credentials>,
}

impl PageFetcher {
    /// Creates a fetcher from the run configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The crawl run configuration
    /// * `credentials` - Optional basic auth credentials, sent to the original host only
    pub fn new(
        config: &CrawlConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            max_redirects: config.max_redirects,
            credentials,
        })
    }

    /// Fetches a URL
    ///
    /// # Request Flow
    ///
    /// 1. GET the URL, with basic auth when credentials are set and the host matches
    /// 2. On a 3xx with a `Location`, resolve it and repeat, up to `max_redirects` hops
    ///    - A URL seen twice in one chain is a loop
    /// 3. Read the body of the final response
    ///
    /// # Returns
    ///
    /// * `Ok(FetchResponse)` - The server answered, whatever the status
    /// * `Err(FetchFailure)` - A transport fault, bad URI, or redirect overflow
    pub async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchFailure> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(FetchFailure::new(
                FailureKind::MalformedUri,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if url.host_str().is_none() {
            return Err(FetchFailure::new(FailureKind::MalformedUri, "missing host"));
        }

        let mut current = url.clone();
        let mut chain: Vec<Url> = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([current.to_string()]);

        loop {
            let mut request = self.client.get(current.clone());
            if let Some(creds) = &self.credentials {
                if current.host_str() == url.host_str() {
                    request = request.basic_auth(&creds.username, Some(&creds.password));
                }
            }

            let response = request
                .send()
                .await
                .map_err(|e| FetchFailure::from_reqwest(&e))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok());

                if let Some(location) = location {
                    let next = current.join(location).map_err(|e| {
                        FetchFailure::new(
                            FailureKind::MalformedUri,
                            format!("bad redirect target '{}': {}", location, e),
                        )
                    })?;

                    if chain.len() >= self.max_redirects {
                        return Err(FetchFailure::new(
                            FailureKind::TooManyRedirects,
                            format!("more than {} redirects", self.max_redirects),
                        ));
                    }
                    if !seen.insert(next.to_string()) {
                        return Err(FetchFailure::new(
                            FailureKind::TooManyRedirects,
                            format!("redirect loop at {}", next),
                        ));
                    }

                    chain.push(std::mem::replace(&mut current, next));
                    continue;
                }
            }

            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let bytes = response
                .bytes()
                .await
                .map_err(|e| FetchFailure::from_reqwest(&e))?;

            return Ok(FetchResponse {
                status_code: status.as_u16(),
                content_type,
                body: String::from_utf8_lossy(&bytes).into_owned(),
                final_url: current,
                redirect_chain: chain,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config() -> CrawlConfig {
        let mut config = CrawlConfig::new(["http://example.test/"]);
        config.user_agent = "TestCrawler/1.0".to_string();
        config.request_timeout = Duration::from_secs(5);
        config.max_redirects = 3;
        config
    }

    fn create_test_fetcher() -> PageFetcher {
        PageFetcher::new(&create_test_config(), None).unwrap()
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&create_test_config()).is_ok());
    }

    #[test]
    fn test_failure_kind_retryability() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::Dns.is_retryable());
        assert!(!FailureKind::MalformedUri.is_retryable());
        assert!(FailureKind::TooManyRedirects.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header_matcher("user-agent", "TestCrawler/1.0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>hi</body></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let response = create_test_fetcher()
            .fetch(&url(&server, "/page"))
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);
        assert!(response.is_html());
        assert!(response.body.contains("hi"));
        assert!(response.redirect_chain.is_empty());
    }

    #[tokio::test]
    async fn test_http_errors_are_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = create_test_fetcher()
            .fetch(&url(&server, "/missing"))
            .await
            .unwrap();
        assert_eq!(response.status_code, 404);
    }

    #[tokio::test]
    async fn test_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let response = create_test_fetcher()
            .fetch(&url(&server, "/old"))
            .await
            .unwrap();
        assert_eq!(response.final_url.path(), "/new");
        assert_eq!(response.redirect_chain.len(), 1);
        assert_eq!(response.body, "moved");
    }

    #[tokio::test]
    async fn test_redirect_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/b"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/a"))
            .mount(&server)
            .await;

        let failure = create_test_fetcher()
            .fetch(&url(&server, "/a"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::TooManyRedirects);
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let server = MockServer::start().await;
        for i in 0..5 {
            let next = format!("/r{}", i + 1);
            Mock::given(method("GET"))
                .and(path(format!("/r{}", i)))
                .respond_with(ResponseTemplate::new(302).insert_header("location", next.as_str()))
                .mount(&server)
                .await;
        }

        let failure = create_test_fetcher()
            .fetch(&url(&server, "/r0"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::TooManyRedirects);
    }

    #[tokio::test]
    async fn test_timeout_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hang"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let mut config = create_test_config();
        config.request_timeout = Duration::from_millis(50);
        let fetcher = PageFetcher::new(&config, None).unwrap();

        let start = Instant::now();
        let failure = fetcher.fetch(&url(&server, "/hang")).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(start.elapsed() <= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop a listener so the port is known to be closed
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();

        let failure = create_test_fetcher().fetch(&target).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .and(header_matcher("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fetcher =
            PageFetcher::new(&create_test_config(), Some(Credentials::new("user", "pass")))
                .unwrap();
        let response = fetcher.fetch(&url(&server, "/secure")).await.unwrap();
        assert_eq!(response.status_code, 200);

        let anonymous = create_test_fetcher()
            .fetch(&url(&server, "/secure"))
            .await
            .unwrap();
        assert_eq!(anonymous.status_code, 401);
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let target = Url::parse("ftp://example.test/file").unwrap();
        let failure = create_test_fetcher().fetch(&target).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::MalformedUri);
    }
}
