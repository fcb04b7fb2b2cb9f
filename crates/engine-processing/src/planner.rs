use crate::{error::ProcessingError, retry::RetryCoordinator, source::WorkSource};
use engine_config::settings::validated::ExecutionConfig;
use engine_core::{cancel::CancellationGuard, host::HostTransaction, metrics::StatsAccumulator};
use model::{
    execution::{errors::HostError, outcome::BatchOutcome, stats::QueryStats},
    records::batch::Batch,
};
use std::sync::Arc;
use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, info, warn};

/// Cuts the work source into batches and drives them through the retry
/// coordinator, one at a time or through a bounded pool.
pub struct BatchPlanner {
    batch_size: usize,
    concurrency: usize,
    parallel: bool,
    single_transaction: bool,
    failed_params: Option<usize>,
    coordinator: Arc<RetryCoordinator>,
    stats: StatsAccumulator,
    guard: CancellationGuard,
}

impl BatchPlanner {
    pub fn new(
        config: &ExecutionConfig,
        coordinator: RetryCoordinator,
        stats: StatsAccumulator,
        guard: CancellationGuard,
    ) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            parallel: config.parallel,
            single_transaction: config.is_single_transaction(),
            failed_params: config.failed_params,
            coordinator: Arc::new(coordinator),
            stats,
            guard,
        }
    }

    /// Consumes `source` completely, or until cancellation is observed.
    ///
    /// Batch failures end up in the stats. An error is returned only for a
    /// failing read or an infrastructure failure, after in-flight batches finish.
    pub async fn run(&self, mut source: WorkSource) -> Result<(), ProcessingError> {
        let result = if self.single_transaction {
            self.run_single_transaction(&mut source).await
        } else if self.parallel {
            self.run_parallel(&mut source).await
        } else {
            self.run_sequential(&mut source).await
        };

        // In-flight batches may observe cancellation after the source drained.
        if source.is_interrupted() || self.guard.is_cancelled() {
            self.stats.mark_terminated();
        }
        result
    }

    async fn next_batch(
        &self,
        source: &mut WorkSource,
        seq: &mut u64,
        offset: &mut u64,
    ) -> Result<Option<Batch>, ProcessingError> {
        if self.guard.is_cancelled() {
            self.stats.mark_terminated();
            return Ok(None);
        }

        let items = source.take(self.batch_size).await?;
        if items.is_empty() {
            return Ok(None);
        }

        let size = items.len() as u64;
        self.stats.increment_total(size);
        if source.is_interrupted() {
            // Items pulled before cancellation was seen are counted but not run.
            return Ok(None);
        }

        let batch = Batch::new(*seq, *offset, items);
        *seq += 1;
        *offset += size;
        Ok(Some(batch))
    }

    async fn run_sequential(&self, source: &mut WorkSource) -> Result<(), ProcessingError> {
        let (mut seq, mut offset) = (0, 0);

        while let Some(batch) = self.next_batch(source, &mut seq, &mut offset).await? {
            debug!(batch = batch.seq, rows = batch.len(), "Executing batch");
            self.coordinator.run(batch).await?;
        }
        Ok(())
    }

    async fn run_parallel(&self, source: &mut WorkSource) -> Result<(), ProcessingError> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Result<BatchOutcome, ProcessingError>> = JoinSet::new();
        let mut failure: Option<ProcessingError> = None;
        let (mut seq, mut offset) = (0, 0);

        loop {
            // Admission: a batch is only formed once a slot is free.
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ProcessingError::PoolClosed)?;

            while let Some(joined) = tasks.try_join_next() {
                if let Err(err) = settle(joined) {
                    failure.get_or_insert(err);
                }
            }
            if failure.is_some() {
                break;
            }

            let batch = match self.next_batch(source, &mut seq, &mut offset).await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };

            debug!(
                batch = batch.seq,
                rows = batch.len(),
                in_flight = tasks.len() + 1,
                "Submitting batch"
            );
            let coordinator = Arc::clone(&self.coordinator);
            tasks.spawn(async move {
                let _permit = permit;
                coordinator.run(batch).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = settle(joined) {
                failure.get_or_insert(err);
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// All batches share one transaction. Any failure undoes every batch.
    async fn run_single_transaction(&self, source: &mut WorkSource) -> Result<(), ProcessingError> {
        let executor = self.coordinator.executor();
        let mut tx: Option<Box<dyn HostTransaction>> = None;
        let mut applied: Vec<Batch> = Vec::new();
        let mut stats = QueryStats::default();
        let (mut seq, mut offset) = (0, 0);

        loop {
            let batch = match self.next_batch(source, &mut seq, &mut offset).await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => {
                    self.discard(tx, &applied).await;
                    return Err(err);
                }
            };

            let mut open = match tx.take() {
                Some(open) => open,
                None => match executor.begin().await {
                    Ok(open) => open,
                    Err(err) if err.is_fatal() => return Err(ProcessingError::Fatal(err)),
                    Err(err) => {
                        applied.push(batch);
                        self.fail_all(&applied, err);
                        return Ok(());
                    }
                },
            };

            match executor.apply_in(open.as_mut(), &batch).await {
                Ok(result) => {
                    stats.merge(&result.stats);
                    applied.push(batch);
                    tx = Some(open);
                }
                Err(err) => {
                    rollback(open).await;
                    if err.is_fatal() {
                        return Err(ProcessingError::Fatal(err));
                    }
                    applied.push(batch);
                    self.fail_all(&applied, err);
                    return Ok(());
                }
            }
        }

        if self.stats.is_terminated() || source.is_interrupted() {
            info!(batches = applied.len(), "Cancelled, rolling back single transaction");
            self.discard(tx, &applied).await;
            return Ok(());
        }

        let Some(open) = tx else {
            return Ok(());
        };

        match open.commit().await {
            Ok(()) => {
                let last = applied.len().saturating_sub(1);
                for (idx, batch) in applied.iter().enumerate() {
                    let mut outcome = BatchOutcome::new(batch.seq);
                    outcome.committed = batch.len() as u64;
                    outcome.processed = batch.len();
                    if idx == last {
                        outcome.stats = stats;
                    }
                    self.stats.record(&outcome);
                }
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(ProcessingError::Fatal(err)),
            Err(err) => {
                self.fail_all(&applied, err);
                Ok(())
            }
        }
    }

    /// Every observed item failed; the last batch carries the error.
    fn fail_all(&self, batches: &[Batch], err: HostError) {
        warn!(batches = batches.len(), error = %err, "Single transaction rolled back");
        let last = batches.len().saturating_sub(1);
        for (idx, batch) in batches.iter().enumerate() {
            let mut outcome = BatchOutcome::new(batch.seq);
            outcome.failed = batch.len() as u64;
            if idx == last {
                outcome.error = Some(err.clone());
                if let Some(limit) = self.failed_params {
                    self.stats.record_failed_params(batch, limit);
                }
            }
            self.stats.record(&outcome);
        }
    }

    /// Rolls back after cancellation; nothing is committed or failed.
    async fn discard(&self, tx: Option<Box<dyn HostTransaction>>, batches: &[Batch]) {
        if let Some(open) = tx {
            rollback(open).await;
        }
        for batch in batches {
            self.stats.record(&BatchOutcome::new(batch.seq));
        }
    }
}

async fn rollback(tx: Box<dyn HostTransaction>) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "Rollback failed");
    }
}

fn settle(
    joined: Result<Result<BatchOutcome, ProcessingError>, JoinError>,
) -> Result<BatchOutcome, ProcessingError> {
    match joined {
        Ok(result) => result,
        Err(join) => {
            error!(error = %join, "Batch task did not complete");
            Err(ProcessingError::TaskJoin(join.to_string()))
        }
    }
}
