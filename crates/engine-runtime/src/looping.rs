use crate::{
    engine::BatchEngine,
    error::EngineError,
    validation::{ACTION_FIELD, ITERATE_FIELD, LOOP_CONDITION_FIELD, validate_operations},
};
use engine_config::settings::validated::ExecutionConfig;
use futures::StreamExt;
use model::{
    core::value::{Params, Value, is_truthy, merge_params},
    execution::{
        errors::HostError,
        summary::{LoopSummary, RunSummary},
    },
    records::row::WorkItem,
};
use tracing::{debug, info, warn};

pub const PREVIOUS_PARAM: &str = "previous";
pub const PREVIOUS_SUMMARY_PARAM: &str = "previousSummary";
pub const LOOP_COLUMN: &str = "loop";

/// What the condition query sees of the previous cycle.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub cycle: u64,
    pub previous: Option<Value>,
    pub previous_summary: Option<RunSummary>,
}

impl LoopState {
    pub fn start() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, loop_value: Value, summary: RunSummary) {
        self.cycle += 1;
        self.previous = Some(loop_value);
        self.previous_summary = Some(summary);
    }

    pub fn condition_params(&self, base: &Params) -> Params {
        let mut bound = Params::new();
        bound.insert(
            PREVIOUS_PARAM.to_string(),
            self.previous.clone().unwrap_or(Value::Null),
        );
        bound.insert(
            PREVIOUS_SUMMARY_PARAM.to_string(),
            self.previous_summary
                .as_ref()
                .map(RunSummary::to_value)
                .unwrap_or(Value::Null),
        );
        merge_params(base, bound)
    }
}

/// The condition's value: the `loop` column, or else the value of a
/// single-column row (with several columns, the alphabetically first).
pub fn loop_value(row: &WorkItem) -> Value {
    row.get(LOOP_COLUMN)
        .or_else(|| row.first_value())
        .cloned()
        .unwrap_or(Value::Null)
}

/// Drives iterate/action cycles while the condition query returns a truthy value.
pub struct LoopDriver<'a> {
    engine: &'a BatchEngine,
    condition: &'a str,
    iterate: &'a str,
    action: &'a str,
    config: &'a ExecutionConfig,
}

impl<'a> LoopDriver<'a> {
    pub fn new(
        engine: &'a BatchEngine,
        condition: &'a str,
        iterate: &'a str,
        action: &'a str,
        config: &'a ExecutionConfig,
    ) -> Self {
        Self {
            engine,
            condition,
            iterate,
            action,
            config,
        }
    }

    pub async fn run(&self) -> Result<Vec<LoopSummary>, EngineError> {
        validate_operations(
            self.engine.host().as_ref(),
            &[
                (LOOP_CONDITION_FIELD, self.condition),
                (ITERATE_FIELD, self.iterate),
                (ACTION_FIELD, self.action),
            ],
        )
        .await?;

        let mut state = LoopState::start();
        let mut results = Vec::new();

        loop {
            if self.engine.guard().is_cancelled() {
                info!(cycles = state.cycle, "Loop cancelled");
                break;
            }

            let value = match self.evaluate(&state).await {
                Ok(Some(value)) if is_truthy(&value) => value,
                Ok(value) => {
                    debug!(cycles = state.cycle, value = ?value, "Loop condition no longer holds");
                    break;
                }
                Err(err) => {
                    warn!(cycles = state.cycle, error = %err, "Loop condition failed, stopping");
                    break;
                }
            };

            debug!(cycle = state.cycle + 1, loop_value = %value, "Starting loop cycle");
            let summary = self
                .engine
                .run_cycle(self.iterate, self.action, self.config)
                .await?;
            let terminated = summary.was_terminated;

            state.advance(value.clone(), summary.clone());
            results.push(LoopSummary {
                loop_value: value,
                summary,
            });

            if terminated {
                break;
            }
        }

        info!(cycles = results.len(), "Loop finished");
        Ok(results)
    }

    async fn evaluate(&self, state: &LoopState) -> Result<Option<Value>, HostError> {
        let params = state.condition_params(&self.config.params);
        let mut rows = self.engine.host().read(self.condition, &params).await?;
        match rows.next().await {
            Some(row) => Ok(Some(loop_value(&row?))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loop_column_wins_over_first_column() {
        let row = WorkItem::from_pairs([("a", json!(0)), ("loop", json!(5))]);
        assert_eq!(loop_value(&row), json!(5));

        let row = WorkItem::from_pairs([("remaining", json!(3))]);
        assert_eq!(loop_value(&row), json!(3));

        assert_eq!(loop_value(&WorkItem::default()), Value::Null);
    }

    #[test]
    fn first_evaluation_binds_nulls() {
        let params = LoopState::start().condition_params(&Params::new());
        assert_eq!(params[PREVIOUS_PARAM], Value::Null);
        assert_eq!(params[PREVIOUS_SUMMARY_PARAM], Value::Null);
    }

    #[test]
    fn advance_exposes_previous_cycle() {
        let mut state = LoopState::start();
        let mut summary = RunSummary::empty();
        summary.total = 7;
        state.advance(json!(2), summary);

        let params = state.condition_params(&Params::new());
        assert_eq!(state.cycle, 1);
        assert_eq!(params[PREVIOUS_PARAM], json!(2));
        assert_eq!(params[PREVIOUS_SUMMARY_PARAM]["total"], json!(7));
    }
}
