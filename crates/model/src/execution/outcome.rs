use crate::execution::{errors::HostError, stats::QueryStats};
use std::time::Duration;

/// Result of one executor invocation against a batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub seq: u64,
    pub committed: u64,
    pub failed: u64,
    /// Items applied or rejected individually; a retry resumes after them.
    pub processed: usize,
    pub error: Option<HostError>,
    pub elapsed: Duration,
    pub stats: QueryStats,
}

impl BatchOutcome {
    pub fn new(seq: u64) -> Self {
        BatchOutcome {
            seq,
            committed: 0,
            failed: 0,
            processed: 0,
            error: None,
            elapsed: Duration::ZERO,
            stats: QueryStats::default(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
