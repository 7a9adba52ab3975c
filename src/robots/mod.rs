//! Robots.txt handling module
//!
//! This module fetches, parses, and caches robots.txt files per host. A host whose
//! robots.txt cannot be retrieved is treated as unrestricted for the cache TTL.

mod cache;
mod parser;

pub use cache::{RobotsFilter, RobotsVerdict};
pub use parser::{RobotsRules, MAX_CRAWL_DELAY};
