//! Configuration module for Ripple-Crawl
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and turning them into the typed [`CrawlConfig`] a controller runs with.
//!
//! # Example
//!
//! ```no_run
//! use ripple_crawl::config::{load_config, CrawlConfig};
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! let crawl = CrawlConfig::from_file_config(&config);
//! println!("Crawler will use {} workers", crawl.thread_pool_size);
//! ```

mod crawl;
mod credentials;
mod parser;
mod types;
mod validation;

pub use crawl::CrawlConfig;
pub use credentials::{ConfigCredentialProvider, CredentialProvider, Credentials};
pub use parser::{load_config, parse_config};
pub use validation::validate;
pub use types::{
    Config, CrawlerSection, CredentialsConfig, EndpointEntry, RetrySection, SeedEntry,
    StorageSection, UserAgentConfig,
};
