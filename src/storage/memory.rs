use crate::frontier::CrawlResult;
use crate::storage::{ResultSink, StorageResult};
use std::sync::{Mutex, PoisonError};

/// Result sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<CrawlResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored result, in arrival order
    pub fn results(&self) -> Vec<CrawlResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn store(&self, result: &CrawlResult) -> StorageResult<()> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }
}
