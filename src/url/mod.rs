//! URL handling module for Ripple-Crawl
//!
//! This module provides URL normalization, deduplication fingerprints, host keys,
//! and wildcard domain matching for the allowed-domain scope.

mod domain;
mod matcher;
mod normalize;

pub use domain::{extract_domain, host_key, robots_url};
pub use matcher::{matches_wildcard, DomainScope};
pub use normalize::{fingerprint, normalize_parsed, normalize_url};
