//! Crawler module for fetching pages and driving a crawl run
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with manual redirect handling
//! - HTML parsing and link extraction
//! - The per-worker crawl loop
//! - Run orchestration, worker supervision and checkpointing

mod controller;
mod fetcher;
mod parser;
mod worker;

pub use controller::{CrawlController, CrawlControllerBuilder, CrawlPhase, CrawlReport};
pub use fetcher::{
    build_http_client, FailureKind, FetchFailure, FetchResponse, PageFetcher,
};
pub use parser::{parse_links, HtmlLinkExtractor, LinkExtractor};
pub use worker::WorkerData;
