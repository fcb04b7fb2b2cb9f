use std::{fmt, str::FromStr};

/// Transaction granularity used when applying the action operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionUnitMode {
    /// One transaction per batch, the batch bound as `_batch`.
    #[default]
    PerBatch,
    /// One transaction per item, the item's fields bound directly.
    PerItem,
    /// One transaction spanning every batch of the cycle.
    SingleTransaction,
}

impl ExecutionUnitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionUnitMode::PerBatch => "BATCH",
            ExecutionUnitMode::PerItem => "SINGLE",
            ExecutionUnitMode::SingleTransaction => "SINGLE_TRANSACTION",
        }
    }

    /// Mapping of the legacy `iterateList` flag.
    pub fn from_iterate_list(iterate_list: bool) -> Self {
        if iterate_list {
            ExecutionUnitMode::PerBatch
        } else {
            ExecutionUnitMode::PerItem
        }
    }
}

impl FromStr for ExecutionUnitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BATCH" => Ok(ExecutionUnitMode::PerBatch),
            "SINGLE" => Ok(ExecutionUnitMode::PerItem),
            "SINGLE_TRANSACTION" => Ok(ExecutionUnitMode::SingleTransaction),
            other => Err(format!(
                "batchMode must be one of BATCH, SINGLE, SINGLE_TRANSACTION, got `{other}`"
            )),
        }
    }
}

impl fmt::Display for ExecutionUnitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
