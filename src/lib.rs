//! Ripple-Crawl: a polite, resumable, frontier-driven web crawler
//!
//! This crate implements a bounded-concurrency crawl engine that fetches pages across
//! many hosts while respecting per-host politeness delays, robots.txt exclusion, depth
//! and page budgets, and duplicate-URL suppression. Frontier state can be checkpointed
//! to disk so an interrupted run picks up where it left off.

pub mod config;
pub mod crawler;
pub mod frontier;
pub mod output;
pub mod politeness;
pub mod robots;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Ripple-Crawl operations
///
/// Per-task failures never surface here; they are recorded in
/// [`frontier::CrawlResult`]. Only errors that stop a run before or while it starts
/// are reported through this type.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid crawl phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crawler::CrawlPhase,
        to: crawler::CrawlPhase,
    },

    #[error("Storage folder {path} is unusable: {source}")]
    StorageFolder {
        path: String,
        source: std::io::Error,
    },

    #[error("Crawl supervisor failed: {0}")]
    Supervisor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),

    #[error("Credential error: {0}")]
    Credentials(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Ripple-Crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{load_config, Config, CrawlConfig};
pub use crawler::{CrawlController, CrawlPhase, CrawlReport};
pub use frontier::{CrawlOutcome, CrawlResult, CrawlTask, Frontier};
pub use url::{extract_domain, fingerprint, host_key, normalize_url};
