use crate::{error::ProcessingError, executor::BatchExecutor};
use engine_core::{
    cancel::CancellationGuard,
    metrics::StatsAccumulator,
    retry::{RetryDisposition, RetryPolicy, classify_host_error},
};
use model::{execution::outcome::BatchOutcome, records::batch::Batch};
use std::time::Instant;
use tracing::{error, warn};

/// Re-attempts a failed batch, same items and same sequence number, until it
/// succeeds or the retry budget runs out, then records the final outcome.
pub struct RetryCoordinator {
    executor: BatchExecutor,
    policy: RetryPolicy,
    stats: StatsAccumulator,
    guard: CancellationGuard,
    failed_params: Option<usize>,
}

impl RetryCoordinator {
    pub fn new(
        executor: BatchExecutor,
        policy: RetryPolicy,
        stats: StatsAccumulator,
        guard: CancellationGuard,
        failed_params: Option<usize>,
    ) -> Self {
        Self {
            executor,
            policy,
            stats,
            guard,
            failed_params,
        }
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    /// Runs `batch` to a final outcome. Only infrastructure failures are
    /// returned as errors; everything else ends up in the outcome.
    pub async fn run(&self, batch: Batch) -> Result<BatchOutcome, ProcessingError> {
        let started = Instant::now();
        let mut total = BatchOutcome::new(batch.seq);
        let mut start = 0;
        let mut attempt = 0;

        loop {
            let outcome = self.executor.execute_from(&batch, start, attempt).await;

            // Items past `processed` are only failed if no retry follows.
            let pending = match outcome.error {
                Some(_) => (batch.len() - outcome.processed) as u64,
                None => 0,
            };
            total.committed += outcome.committed;
            total.failed += outcome.failed.saturating_sub(pending);
            total.processed = outcome.processed;
            total.stats.merge(&outcome.stats);

            let Some(err) = outcome.error else {
                break;
            };

            if classify_host_error(&err) == RetryDisposition::Stop {
                error!(
                    batch = batch.seq,
                    attempt,
                    error = %err,
                    "Fatal error while executing batch"
                );
                return Err(ProcessingError::Fatal(err));
            }

            if !self.policy.allows_retry(attempt) || self.guard.is_cancelled() {
                total.failed += pending;
                total.error = Some(err);
                break;
            }

            self.stats.increment_retries();
            warn!(
                batch = batch.seq,
                attempt = attempt + 1,
                resume_at = outcome.processed,
                error = %err,
                "Retrying failed batch"
            );
            self.policy.pause(attempt).await;
            attempt += 1;
            start = outcome.processed;
        }

        total.elapsed = started.elapsed();

        if let Some(err) = &total.error {
            warn!(
                batch = batch.seq,
                attempts = attempt + 1,
                failed = total.failed,
                error = %err,
                "Batch failed"
            );
            if let Some(limit) = self.failed_params {
                self.stats.record_failed_params(&batch, limit);
            }
        }

        self.stats.record(&total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::settings::mode::ExecutionUnitMode;
    use engine_core::{host::QueryResult, testing::MemoryHost};
    use model::{core::value::Params, execution::errors::HostError, records::row::WorkItem};
    use serde_json::json;
    use std::{sync::Arc, time::Duration};

    const ACTION: &str = "SET n.x = $x";

    fn batch(xs: &[i64]) -> Batch {
        let items = xs
            .iter()
            .map(|x| WorkItem::from_pairs([("x", json!(x))]))
            .collect();
        Batch::new(0, 0, items)
    }

    fn coordinator(
        host: &MemoryHost,
        mode: ExecutionUnitMode,
        retries: u64,
        failed_params: Option<usize>,
        stats: &StatsAccumulator,
    ) -> RetryCoordinator {
        let guard = CancellationGuard::new();
        let executor = BatchExecutor::new(
            Arc::new(host.clone()),
            ACTION,
            Params::new(),
            mode,
            stats.clone(),
            guard.clone(),
        );
        RetryCoordinator::new(
            executor,
            RetryPolicy::new(retries, Duration::ZERO, Duration::ZERO),
            stats.clone(),
            guard,
            failed_params,
        )
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let host = MemoryHost::new();
        host.register_write(ACTION, |params| {
            if params["_retry"] == json!(0) {
                Err(HostError::operation("deadlock detected"))
            } else {
                Ok(QueryResult::default())
            }
        });
        let stats = StatsAccumulator::new();

        let outcome = coordinator(&host, ExecutionUnitMode::PerBatch, 2, None, &stats)
            .run(batch(&[1, 2]))
            .await
            .unwrap();

        assert_eq!(outcome.committed, 2);
        assert!(!outcome.is_failure());
        let summary = stats.finalize();
        assert_eq!(summary.retries, 1);
        assert_eq!(summary.failed_batches, 0);
        assert_eq!(summary.operation_error_messages["deadlock detected"], 1);
    }

    #[tokio::test]
    async fn exhausted_budget_fails_batch_once() {
        let host = MemoryHost::new();
        host.register_write(ACTION, |_| Err(HostError::operation("/ by zero")));
        let stats = StatsAccumulator::new();

        let outcome = coordinator(&host, ExecutionUnitMode::PerBatch, 2, Some(1), &stats)
            .run(batch(&[1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.committed, 0);
        let summary = stats.finalize();
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.failed_operations, 3);
        assert_eq!(summary.error_messages["/ by zero"], 1);
        assert_eq!(summary.operation_error_messages["/ by zero"], 3);
        assert_eq!(summary.failed_params["0"].len(), 1);
    }

    #[tokio::test]
    async fn per_item_retry_resumes_after_committed_items() {
        let host = MemoryHost::new();
        let stats = StatsAccumulator::new();
        let coordinator = coordinator(&host, ExecutionUnitMode::PerItem, 1, None, &stats);

        // First item commits, second item's commit fails, retry picks up from it.
        let host_for_fault = host.clone();
        host.register_write(ACTION, move |params| {
            if params["x"] == json!(2) && params["_retry"] == json!(0) {
                host_for_fault.fail_next_commits(1);
            }
            Ok(QueryResult::default())
        });

        let outcome = coordinator.run(batch(&[1, 2, 3])).await.unwrap();

        assert_eq!(outcome.committed, 3);
        assert_eq!(outcome.failed, 0);
        let xs: Vec<_> = host.applied().iter().map(|p| p["x"].clone()).collect();
        assert_eq!(xs, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(stats.finalize().retries, 1);
    }

    #[tokio::test]
    async fn unavailable_host_aborts() {
        let host = MemoryHost::new();
        host.register_write(ACTION, |_| Ok(QueryResult::default()));
        host.fail_next_begins(5);
        let stats = StatsAccumulator::new();

        let result = coordinator(&host, ExecutionUnitMode::PerBatch, 3, None, &stats)
            .run(batch(&[1]))
            .await;

        assert!(matches!(result, Err(ProcessingError::Fatal(HostError::Unavailable(_)))));
        assert_eq!(stats.finalize().retries, 0);
    }
}
