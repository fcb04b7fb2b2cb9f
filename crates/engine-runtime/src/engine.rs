use crate::{
    error::EngineError,
    looping::LoopDriver,
    rundown::Rundown,
    validation::{ACTION_FIELD, ITERATE_FIELD, validate_operations},
};
use engine_config::settings::{self, validated::ExecutionConfig};
use engine_core::{cancel::CancellationGuard, host::GraphHost, metrics::StatsAccumulator};
use engine_processing::{
    executor::BatchExecutor,
    planner::BatchPlanner,
    pump::PumpOptions,
    retry::RetryCoordinator,
    source::WorkSource,
};
use model::{
    core::value::{Params, Value},
    execution::summary::{LoopSummary, RundownSummary, RunSummary},
};
use serde_json::Map;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Entry point for batch execution against a host database.
///
/// Every call runs under the engine's cancellation guard; once it trips,
/// running calls wind down and report `wasTerminated`.
#[derive(Clone)]
pub struct BatchEngine {
    host: Arc<dyn GraphHost>,
    guard: CancellationGuard,
}

impl BatchEngine {
    pub fn new(host: Arc<dyn GraphHost>, guard: CancellationGuard) -> Self {
        Self { host, guard }
    }

    pub fn host(&self) -> &Arc<dyn GraphHost> {
        &self.host
    }

    pub fn guard(&self) -> &CancellationGuard {
        &self.guard
    }

    /// Runs `action` over everything `iterate` returns, configured by a raw map.
    pub async fn iterate(
        &self,
        iterate: &str,
        action: &str,
        config: &Map<String, Value>,
    ) -> Result<RunSummary, EngineError> {
        let config = settings::from_map(config)?;
        self.iterate_with_config(iterate, action, &config).await
    }

    pub async fn iterate_with_config(
        &self,
        iterate: &str,
        action: &str,
        config: &ExecutionConfig,
    ) -> Result<RunSummary, EngineError> {
        validate_operations(
            self.host.as_ref(),
            &[(ITERATE_FIELD, iterate), (ACTION_FIELD, action)],
        )
        .await?;
        self.run_cycle(iterate, action, config).await
    }

    /// Repeats iterate/action cycles while `condition` admits them.
    pub async fn iterate_while(
        &self,
        condition: &str,
        iterate: &str,
        action: &str,
        config: &Map<String, Value>,
    ) -> Result<Vec<LoopSummary>, EngineError> {
        let config = settings::from_map(config)?;
        self.iterate_while_with_config(condition, iterate, action, &config)
            .await
    }

    pub async fn iterate_while_with_config(
        &self,
        condition: &str,
        iterate: &str,
        action: &str,
        config: &ExecutionConfig,
    ) -> Result<Vec<LoopSummary>, EngineError> {
        LoopDriver::new(self, condition, iterate, action, config)
            .run()
            .await
    }

    /// Re-runs `statement` until it reports no more updates.
    pub async fn rundown(
        &self,
        statement: &str,
        params: Params,
    ) -> Result<RundownSummary, EngineError> {
        Rundown::new(self, statement, params).run().await
    }

    /// One full iterate/action cycle. Operations are assumed valid.
    pub(crate) async fn run_cycle(
        &self,
        iterate: &str,
        action: &str,
        config: &ExecutionConfig,
    ) -> Result<RunSummary, EngineError> {
        let run_id = Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            batch_size = config.batch_size,
            parallel = config.parallel,
            mode = %config.mode,
            "Starting iterate cycle"
        );

        let stats = StatsAccumulator::new();
        let source = WorkSource::from_read(
            Arc::clone(&self.host),
            iterate,
            config.params.clone(),
            PumpOptions::from_config(config),
            self.guard.clone(),
        );
        let executor = BatchExecutor::new(
            Arc::clone(&self.host),
            action,
            config.params.clone(),
            config.mode,
            stats.clone(),
            self.guard.clone(),
        );
        let coordinator = RetryCoordinator::new(
            executor,
            config.retry_policy(),
            stats.clone(),
            self.guard.clone(),
            config.failed_params,
        );
        let planner = BatchPlanner::new(config, coordinator, stats.clone(), self.guard.clone());

        if let Err(err) = planner.run(source).await {
            warn!(run_id = %run_id, error = %err, "Iterate cycle aborted");
            return Err(err.into());
        }

        stats.log_errors(&run_id);
        let summary = stats.finalize();
        info!(
            run_id = %run_id,
            batches = summary.batches,
            total = summary.total,
            committed = summary.committed_operations,
            failed = summary.failed_operations,
            failed_batches = summary.failed_batches,
            retries = summary.retries,
            terminated = summary.was_terminated,
            "Iterate cycle finished"
        );
        Ok(summary)
    }
}
