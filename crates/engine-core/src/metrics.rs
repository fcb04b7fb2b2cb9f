use chrono::{DateTime, Utc};
use dashmap::DashMap;
use model::{
    execution::{outcome::BatchOutcome, stats::QueryStats, summary::RunSummary},
    records::{batch::Batch, row::WorkItem},
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};
use tracing::warn;

#[derive(Debug, Default)]
struct UpdateCounters {
    nodes_created: AtomicU64,
    nodes_deleted: AtomicU64,
    relationships_created: AtomicU64,
    relationships_deleted: AtomicU64,
    properties_set: AtomicU64,
    labels_added: AtomicU64,
    labels_removed: AtomicU64,
}

impl UpdateCounters {
    fn add(&self, stats: &QueryStats) {
        self.nodes_created
            .fetch_add(stats.nodes_created, Ordering::Relaxed);
        self.nodes_deleted
            .fetch_add(stats.nodes_deleted, Ordering::Relaxed);
        self.relationships_created
            .fetch_add(stats.relationships_created, Ordering::Relaxed);
        self.relationships_deleted
            .fetch_add(stats.relationships_deleted, Ordering::Relaxed);
        self.properties_set
            .fetch_add(stats.properties_set, Ordering::Relaxed);
        self.labels_added
            .fetch_add(stats.labels_added, Ordering::Relaxed);
        self.labels_removed
            .fetch_add(stats.labels_removed, Ordering::Relaxed);
    }

    fn snapshot(&self) -> QueryStats {
        QueryStats {
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            nodes_deleted: self.nodes_deleted.load(Ordering::Relaxed),
            relationships_created: self.relationships_created.load(Ordering::Relaxed),
            relationships_deleted: self.relationships_deleted.load(Ordering::Relaxed),
            properties_set: self.properties_set.load(Ordering::Relaxed),
            labels_added: self.labels_added.load(Ordering::Relaxed),
            labels_removed: self.labels_removed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct InnerStats {
    batches: AtomicU64,
    total: AtomicU64,
    committed: AtomicU64,
    failed: AtomicU64,
    failed_batches: AtomicU64,
    retries: AtomicU64,
    terminated: AtomicBool,
    batch_errors: ErrorHistogram,
    operation_errors: ErrorHistogram,
    failed_params: DashMap<u64, Vec<WorkItem>>,
    updates: UpdateCounters,
    started: Instant,
    started_at: DateTime<Utc>,
    finalized: OnceLock<RunSummary>,
}

/// Thread-safe aggregation of one cycle's counters and error histograms.
///
/// Every update is a commutative increment, so the final summary does not
/// depend on the order in which concurrent batches complete.
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    inner: Arc<InnerStats>,
}

/// Point-in-time view of the scalar counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub batches: u64,
    pub total: u64,
    pub committed: u64,
    pub failed: u64,
    pub failed_batches: u64,
    pub retries: u64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        StatsAccumulator {
            inner: Arc::new(InnerStats {
                batches: AtomicU64::new(0),
                total: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                failed_batches: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                terminated: AtomicBool::new(false),
                batch_errors: ErrorHistogram::new(),
                operation_errors: ErrorHistogram::new(),
                failed_params: DashMap::new(),
                updates: UpdateCounters::default(),
                started: Instant::now(),
                started_at: Utc::now(),
                finalized: OnceLock::new(),
            }),
        }
    }

    /// Items pulled from the work source.
    pub fn increment_total(&self, count: u64) {
        self.inner.total.fetch_add(count, Ordering::Relaxed);
    }

    /// One re-attempt beyond the first.
    pub fn increment_retries(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds a final batch outcome into the counters.
    pub fn record(&self, outcome: &BatchOutcome) {
        self.inner.batches.fetch_add(1, Ordering::Relaxed);
        self.inner
            .committed
            .fetch_add(outcome.committed, Ordering::Relaxed);
        self.inner.failed.fetch_add(outcome.failed, Ordering::Relaxed);
        self.inner.updates.add(&outcome.stats);

        if let Some(err) = &outcome.error {
            self.inner.failed_batches.fetch_add(1, Ordering::Relaxed);
            self.inner.batch_errors.record(err.message());
        }
    }

    /// Error raised by a single execution of the action operation.
    pub fn record_operation_error(&self, message: &str) {
        self.inner.operation_errors.record(message);
    }

    /// Keeps the first `limit` items of a failed batch for the summary.
    pub fn record_failed_params(&self, batch: &Batch, limit: usize) {
        let kept = batch.items.iter().take(limit).cloned().collect();
        self.inner.failed_params.insert(batch.seq, kept);
    }

    pub fn mark_terminated(&self) {
        self.inner.terminated.store(true, Ordering::Relaxed);
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.inner.batches.load(Ordering::Relaxed),
            total: self.inner.total.load(Ordering::Relaxed),
            committed: self.inner.committed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            failed_batches: self.inner.failed_batches.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
        }
    }

    /// Produces the cycle summary. The first call freezes it; later calls
    /// return the same value.
    pub fn finalize(&self) -> RunSummary {
        self.inner
            .finalized
            .get_or_init(|| {
                let snap = self.snapshot();
                RunSummary {
                    batches: snap.batches,
                    total: snap.total,
                    time_taken: self.inner.started.elapsed().as_secs(),
                    committed_operations: snap.committed,
                    failed_operations: snap.failed,
                    failed_batches: snap.failed_batches,
                    retries: snap.retries,
                    error_messages: self.inner.batch_errors.to_map(),
                    operation_error_messages: self.inner.operation_errors.to_map(),
                    was_terminated: self.is_terminated(),
                    update_statistics: self.inner.updates.snapshot(),
                    failed_params: self
                        .inner
                        .failed_params
                        .iter()
                        .map(|e| (e.key().to_string(), e.value().clone()))
                        .collect(),
                    started_at: self.inner.started_at,
                }
            })
            .clone()
    }

    /// Logs both histograms as warnings.
    pub fn log_errors(&self, run_id: &str) {
        for (message, count) in self.inner.batch_errors.to_map() {
            warn!(run_id, count, error = %message, "Error during iterate.commit");
        }
        for (message, count) in self.inner.operation_errors.to_map() {
            warn!(run_id, count, error = %message, "Error during iterate.execute");
        }
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Error message -> occurrence count, safe to update from concurrent batches.
#[derive(Debug, Default)]
pub struct ErrorHistogram {
    counts: DashMap<String, u64>,
}

impl ErrorHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: &str) {
        *self.counts.entry(message.to_string()).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}
