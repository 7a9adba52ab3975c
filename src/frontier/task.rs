//! Crawl tasks and their results

use crate::crawler::FailureKind;
use crate::url::{fingerprint, normalize_url};
use crate::UrlError;
use chrono::{DateTime, Utc};
use std::fmt;
use url::Url;

/// A URL queued for fetching
///
/// Created from a seed or from a link extracted out of a fetched page. The URL is
/// normalized on construction and the fingerprint is derived from it, so two tasks
/// for equivalent URLs always share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    /// Normalized absolute URL
    pub url: Url,

    /// Deduplication key, see [`crate::url::fingerprint`]
    pub fingerprint: String,

    /// Link distance from the seed that led here; seeds are depth 0
    pub depth: u32,

    /// The page this URL was extracted from
    pub parent_url: Option<Url>,

    pub discovered_at: DateTime<Utc>,
}

impl CrawlTask {
    /// Builds a task from a raw URI, normalizing it
    pub fn from_uri(uri: &str, depth: u32, parent_url: Option<Url>) -> Result<Self, UrlError> {
        let url = normalize_url(uri)?;
        Ok(Self::from_normalized(url, depth, parent_url, Utc::now()))
    }

    /// A depth-0 seed task
    pub fn seed(uri: &str) -> Result<Self, UrlError> {
        Self::from_uri(uri, 0, None)
    }

    /// A task for a link found on `parent`, one level deeper
    pub fn child_of(parent: &CrawlTask, uri: &str) -> Result<Self, UrlError> {
        Self::from_uri(uri, parent.depth.saturating_add(1), Some(parent.url.clone()))
    }

    /// Rebuilds a task from an already-normalized URL, e.g. when loading saved state
    pub fn from_normalized(
        url: Url,
        depth: u32,
        parent_url: Option<Url>,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint: fingerprint(&url),
            url,
            depth,
            parent_url,
            discovered_at,
        }
    }

    /// Host key of the task URL, used for politeness and robots lookups
    pub fn host(&self) -> String {
        crate::url::host_key(&self.url).unwrap_or_default()
    }
}

/// Why a dequeued task was not fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// robots.txt disallows the path for our user agent
    RobotsDisallowed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RobotsDisallowed => f.write_str("disallowed by robots.txt"),
        }
    }
}

/// What happened to one dequeued task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The server answered. 4xx/5xx responses land here too.
    Success {
        status_code: u16,
        content_type: Option<String>,
        /// URL after following redirects
        final_url: Url,
        /// Outbound links handed back by the link extractor
        extracted_links: Vec<String>,
        /// How many of those links the frontier accepted
        accepted_links: usize,
        body_len: usize,
    },

    /// Transport-level fault; no response was received
    Failure { kind: FailureKind, message: String },

    /// The task was dequeued but deliberately not fetched
    Skipped { reason: SkipReason },
}

impl CrawlOutcome {
    /// Returns the HTTP status of a response, if there was one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Success { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// True for a response with a 4xx or 5xx status
    pub fn is_http_error(&self) -> bool {
        self.status_code().is_some_and(|s| s >= 400)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// The final record of one task, produced once per task by the worker that
/// finished it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlResult {
    pub task: CrawlTask,
    pub outcome: CrawlOutcome,
    /// Number of fetch attempts made, including retries
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}
