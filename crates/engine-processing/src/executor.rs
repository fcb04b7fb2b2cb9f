use engine_config::settings::mode::ExecutionUnitMode;
use engine_core::{
    cancel::CancellationGuard,
    host::{GraphHost, HostTransaction, QueryResult},
    metrics::StatsAccumulator,
};
use model::{
    core::value::{Params, Value, merge_params},
    execution::{errors::HostError, outcome::BatchOutcome},
    records::{batch::Batch, row::WorkItem},
};
use std::{sync::Arc, time::Instant};
use tracing::{debug, warn};

pub const BATCH_PARAM: &str = "_batch";
pub const COUNT_PARAM: &str = "_count";
pub const RETRY_PARAM: &str = "_retry";

/// Applies the action operation to one batch.
///
/// An attempt covers the items from `start` to the end of the batch. In the
/// returned outcome `processed` is where the next attempt resumes, and on a
/// batch-level error every item from `processed` on is counted as failed.
#[derive(Clone)]
pub struct BatchExecutor {
    host: Arc<dyn GraphHost>,
    action: Arc<str>,
    params: Params,
    mode: ExecutionUnitMode,
    stats: StatsAccumulator,
    guard: CancellationGuard,
}

impl BatchExecutor {
    pub fn new(
        host: Arc<dyn GraphHost>,
        action: &str,
        params: Params,
        mode: ExecutionUnitMode,
        stats: StatsAccumulator,
        guard: CancellationGuard,
    ) -> Self {
        Self {
            host,
            action: Arc::from(action),
            params,
            mode,
            stats,
            guard,
        }
    }

    pub fn mode(&self) -> ExecutionUnitMode {
        self.mode
    }

    pub async fn execute(&self, batch: &Batch) -> BatchOutcome {
        self.execute_from(batch, 0, 0).await
    }

    pub async fn execute_from(&self, batch: &Batch, start: usize, attempt: u64) -> BatchOutcome {
        let started = Instant::now();
        let mut outcome = match self.mode {
            ExecutionUnitMode::PerItem => self.execute_items(batch, start, attempt).await,
            ExecutionUnitMode::PerBatch | ExecutionUnitMode::SingleTransaction => {
                self.execute_batch(batch, attempt).await
            }
        };
        outcome.elapsed = started.elapsed();

        debug!(
            batch = batch.seq,
            attempt,
            committed = outcome.committed,
            failed = outcome.failed,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Batch attempt finished"
        );
        outcome
    }

    /// Opens a transaction for callers that span several batches.
    pub async fn begin(&self) -> Result<Box<dyn HostTransaction>, HostError> {
        self.host.begin().await
    }

    /// Runs the action for `batch` inside a transaction owned by the caller.
    pub async fn apply_in(
        &self,
        tx: &mut dyn HostTransaction,
        batch: &Batch,
    ) -> Result<QueryResult, HostError> {
        let params = self.batch_params(batch, 0);
        tx.execute(&self.action, &params).await.inspect_err(|err| {
            self.stats.record_operation_error(err.message());
        })
    }

    async fn execute_batch(&self, batch: &Batch, attempt: u64) -> BatchOutcome {
        let mut outcome = BatchOutcome::new(batch.seq);
        let params = self.batch_params(batch, attempt);

        let result: Result<QueryResult, HostError> = async {
            let mut tx = self.host.begin().await?;
            match tx.execute(&self.action, &params).await {
                Ok(result) => {
                    tx.commit().await?;
                    Ok(result)
                }
                Err(err) => {
                    self.stats.record_operation_error(err.message());
                    rollback(tx, batch.seq).await;
                    Err(err)
                }
            }
        }
        .await;

        match result {
            Ok(result) => {
                outcome.committed = batch.len() as u64;
                outcome.processed = batch.len();
                outcome.stats = result.stats;
            }
            Err(err) => {
                outcome.failed = batch.len() as u64;
                outcome.error = Some(err);
            }
        }
        outcome
    }

    async fn execute_items(&self, batch: &Batch, start: usize, attempt: u64) -> BatchOutcome {
        let mut outcome = BatchOutcome::new(batch.seq);
        outcome.processed = start;
        let batch_value = batch.to_value();

        for (idx, item) in batch.items.iter().enumerate().skip(start) {
            if self.guard.is_cancelled() {
                debug!(batch = batch.seq, item = idx, "Cancellation observed between items");
                break;
            }

            let offset = batch.offset + idx as u64;
            let params = self.item_params(item, &batch_value, offset, attempt);

            let mut tx = match self.host.begin().await {
                Ok(tx) => tx,
                Err(err) => {
                    outcome.error = Some(err);
                    break;
                }
            };

            match tx.execute(&self.action, &params).await {
                Ok(result) => {
                    if let Err(err) = tx.commit().await {
                        outcome.error = Some(err);
                        break;
                    }
                    outcome.committed += 1;
                    outcome.stats.merge(&result.stats);
                }
                Err(err) => {
                    self.stats.record_operation_error(err.message());
                    rollback(tx, batch.seq).await;
                    outcome.failed += 1;
                }
            }
            outcome.processed = idx + 1;
        }

        if outcome.error.is_some() {
            outcome.failed += (batch.len() - outcome.processed) as u64;
        }
        outcome
    }

    fn batch_params(&self, batch: &Batch, attempt: u64) -> Params {
        let mut bound = Params::new();
        bound.insert(BATCH_PARAM.to_string(), batch.to_value());
        bound.insert(COUNT_PARAM.to_string(), Value::from(batch.offset));
        bound.insert(RETRY_PARAM.to_string(), Value::from(attempt));
        merge_params(&self.params, bound)
    }

    fn item_params(&self, item: &WorkItem, batch: &Value, offset: u64, attempt: u64) -> Params {
        let mut bound = item.to_params();
        bound.insert(BATCH_PARAM.to_string(), batch.clone());
        bound.insert(COUNT_PARAM.to_string(), Value::from(offset));
        bound.insert(RETRY_PARAM.to_string(), Value::from(attempt));
        merge_params(&self.params, bound)
    }
}

async fn rollback(tx: Box<dyn HostTransaction>, seq: u64) {
    if let Err(err) = tx.rollback().await {
        warn!(batch = seq, error = %err, "Rollback failed");
    }
}
