use crate::{
    core::value::Value,
    execution::stats::QueryStats,
    records::row::WorkItem,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate result of one iterate/action cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub batches: u64,
    pub total: u64,
    /// Whole seconds.
    pub time_taken: u64,
    pub committed_operations: u64,
    pub failed_operations: u64,
    pub failed_batches: u64,
    pub retries: u64,
    pub error_messages: BTreeMap<String, u64>,
    pub operation_error_messages: BTreeMap<String, u64>,
    pub was_terminated: bool,
    pub update_statistics: QueryStats,
    pub failed_params: BTreeMap<String, Vec<WorkItem>>,
    pub started_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn empty() -> Self {
        RunSummary {
            batches: 0,
            total: 0,
            time_taken: 0,
            committed_operations: 0,
            failed_operations: 0,
            failed_batches: 0,
            retries: 0,
            error_messages: BTreeMap::new(),
            operation_error_messages: BTreeMap::new(),
            was_terminated: false,
            update_statistics: QueryStats::default(),
            failed_params: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One completed cycle of the looping variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSummary {
    /// Condition value that admitted this cycle.
    #[serde(rename = "loop")]
    pub loop_value: Value,
    #[serde(flatten)]
    pub summary: RunSummary,
}

/// Result of repeatedly running a statement until it reports no updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RundownSummary {
    pub updates: u64,
    pub executions: u64,
    /// Whole seconds.
    pub runtime: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub batch_errors: BTreeMap<String, u64>,
    pub failed_commits: u64,
    pub commit_errors: BTreeMap<String, u64>,
    pub was_terminated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_uses_consumer_field_names() {
        let value = RunSummary::empty().to_value();
        let obj = value.as_object().expect("object");
        for key in [
            "batches",
            "total",
            "timeTaken",
            "committedOperations",
            "failedOperations",
            "failedBatches",
            "retries",
            "errorMessages",
            "operationErrorMessages",
            "wasTerminated",
            "updateStatistics",
            "failedParams",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn loop_summary_flattens_run_fields() {
        let summary = LoopSummary {
            loop_value: Value::from(2),
            summary: RunSummary::empty(),
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["loop"], Value::from(2));
        assert_eq!(value["batches"], Value::from(0));
    }
}
