use crate::{engine::BatchEngine, error::EngineError, validation::validate_operations};
use engine_core::{host::QueryResult, metrics::ErrorHistogram};
use model::{
    core::value::{Params, Value, merge_params, to_i64},
    execution::summary::RundownSummary,
};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const STATEMENT_FIELD: &str = "statement";
pub const LAST_COUNT_PARAM: &str = "_count";
pub const TOTAL_PARAM: &str = "_total";
pub const MISSING_LIMIT: &str = "the statement sent to rundown must contain a `limit`";

/// Re-runs a self-limiting statement, each execution in its own transaction,
/// until an execution reports no updates.
///
/// Only executions that updated something count as executions; every attempt
/// counts as a batch.
pub struct Rundown<'a> {
    engine: &'a BatchEngine,
    statement: &'a str,
    params: Params,
}

impl<'a> Rundown<'a> {
    pub fn new(engine: &'a BatchEngine, statement: &'a str, params: Params) -> Self {
        Self {
            engine,
            statement,
            params,
        }
    }

    pub async fn run(&self) -> Result<RundownSummary, EngineError> {
        validate_operations(
            self.engine.host().as_ref(),
            &[(STATEMENT_FIELD, self.statement)],
        )
        .await?;
        if !has_limit(self.statement) {
            return Err(EngineError::Validation(MISSING_LIMIT.to_string()));
        }

        let started = Instant::now();
        let guard = self.engine.guard();
        let batch_errors = ErrorHistogram::new();
        let commit_errors = ErrorHistogram::new();
        let mut summary = RundownSummary::default();
        let mut last = 0u64;

        while !guard.is_cancelled() {
            let params = self.bind(last, summary.updates);
            let mut tx = self.engine.host().begin().await.map_err(EngineError::Host)?;
            summary.batches += 1;

            let result = match tx.execute(self.statement, &params).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(batches = summary.batches, error = %err, "Rundown execution failed");
                    if let Err(rb) = tx.rollback().await {
                        warn!(error = %rb, "Rollback failed");
                    }
                    summary.failed_batches += 1;
                    batch_errors.record(err.message());
                    break;
                }
            };

            if let Err(err) = tx.commit().await {
                warn!(batches = summary.batches, error = %err, "Rundown commit failed");
                summary.failed_commits += 1;
                commit_errors.record(err.message());
                break;
            }

            last = update_count(&result);
            if last == 0 {
                break;
            }
            summary.updates += last;
            summary.executions += 1;
            debug!(executions = summary.executions, updates = last, "Rundown execution committed");
        }

        summary.batch_errors = batch_errors.to_map();
        summary.commit_errors = commit_errors.to_map();
        summary.was_terminated = guard.is_cancelled();
        summary.runtime = started.elapsed().as_secs();
        info!(
            updates = summary.updates,
            executions = summary.executions,
            terminated = summary.was_terminated,
            "Rundown finished"
        );
        Ok(summary)
    }

    fn bind(&self, last: u64, total: u64) -> Params {
        let mut bound = Params::new();
        bound.insert(LAST_COUNT_PARAM.to_string(), Value::from(last));
        bound.insert(TOTAL_PARAM.to_string(), Value::from(total));
        merge_params(&self.params, bound)
    }
}

/// Sum of the first column over all returned rows; non-numeric values count as zero.
fn update_count(result: &QueryResult) -> u64 {
    result
        .rows
        .iter()
        .filter_map(|row| row.first_value().and_then(to_i64))
        .map(|n| n.max(0) as u64)
        .sum()
}

/// A whitespace-delimited `limit` keyword, in any case.
fn has_limit(statement: &str) -> bool {
    let lower = statement.to_lowercase();
    lower.match_indices("limit").any(|(at, word)| {
        let before = lower[..at].chars().next_back();
        let after = lower[at + word.len()..].chars().next();
        before.is_some_and(char::is_whitespace) && after.is_some_and(char::is_whitespace)
    })
}
