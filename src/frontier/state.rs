use crate::frontier::CrawlTask;
use std::collections::{HashMap, HashSet};

/// A task waiting in the frontier, with the attempts already spent on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub task: CrawlTask,
    pub attempts: u32,
}

impl PendingTask {
    pub fn fresh(task: CrawlTask) -> Self {
        Self { task, attempts: 0 }
    }
}

/// Point-in-time copy of everything the frontier knows
///
/// A fingerprint appears in at most one of `pending`, `in_progress`, `visited` and
/// `excluded`. The persisted form never carries `in_progress`: checkpoints fold
/// checked-out tasks back into `pending` first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierState {
    /// Waiting tasks in dequeue order
    pub pending: Vec<PendingTask>,

    /// Fingerprints currently checked out by a worker
    pub in_progress: HashSet<String>,

    /// Fingerprints whose fetch finished, successfully or not
    pub visited: HashSet<String>,

    /// Fingerprints dequeued but refused by robots.txt
    pub excluded: HashSet<String>,

    /// Accepted tasks per host key
    pub domain_counters: HashMap<String, usize>,
}

impl FrontierState {
    /// Total number of distinct tasks this state has ever accepted
    pub fn accepted(&self) -> usize {
        self.pending.len() + self.in_progress.len() + self.visited.len() + self.excluded.len()
    }

    /// True when there is nothing left to fetch
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.in_progress.is_empty()
    }

    /// Returns true if the fingerprint is known in any set
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.visited.contains(fingerprint)
            || self.excluded.contains(fingerprint)
            || self.in_progress.contains(fingerprint)
            || self.pending.iter().any(|p| p.task.fingerprint == fingerprint)
    }
}
