use crate::settings::{
    error::SettingsError,
    mode::ExecutionUnitMode,
    validated::{ExecutionConfig, ExecutionConfigBuilder},
};
use model::core::value::{Params, Value, to_bool, to_i64};
use serde_json::Map;
use std::time::Duration;
use tracing::{debug, info, warn};

const KNOWN_KEYS: &[&str] = &[
    "batchSize",
    "concurrency",
    "parallel",
    "retries",
    "batchMode",
    "iterateList",
    "params",
    "failedParams",
    "retryDelay",
    "maxRetryDelay",
    "queueCapacity",
    "cancelCheckEvery",
    "cancelPollInterval",
];

/// Resolves a raw configuration map into an `ExecutionConfig`.
///
/// Every key is checked before failing so the caller sees all problems at once.
pub struct SettingsValidator<'a> {
    raw: &'a Map<String, Value>,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(raw: &'a Map<String, Value>) -> Self {
        Self { raw }
    }

    pub fn validate(&self) -> Result<ExecutionConfig, SettingsError> {
        let mut builder = ExecutionConfigBuilder::new();
        let mut errors: Vec<String> = Vec::new();

        self.report_unknown_keys();

        builder.batch_size = self.positive("batchSize", &mut errors);
        builder.concurrency = self.positive("concurrency", &mut errors);
        builder.queue_capacity = self.positive("queueCapacity", &mut errors);
        builder.cancel_check_every = self.positive("cancelCheckEvery", &mut errors);
        builder.cancel_poll_interval = self
            .positive("cancelPollInterval", &mut errors)
            .map(|ms| Duration::from_millis(ms as u64));
        builder.retries = self.non_negative("retries", &mut errors);
        builder.retry_delay = self
            .non_negative("retryDelay", &mut errors)
            .map(Duration::from_millis);
        builder.max_retry_delay = self
            .non_negative("maxRetryDelay", &mut errors)
            .map(Duration::from_millis);
        builder.parallel = self.flag("parallel", &mut errors);
        builder.failed_params = self
            .integer("failedParams", &mut errors)
            .and_then(|limit| usize::try_from(limit).ok());
        builder.mode = self.validate_mode(&mut errors);
        builder.params = self.validate_params(&mut errors);

        if !errors.is_empty() {
            return Err(SettingsError::ValidationFailed(errors));
        }

        self.normalize(&mut builder);

        let validated = builder.build();
        info!(
            batch_size = validated.batch_size,
            concurrency = validated.concurrency,
            parallel = validated.parallel,
            retries = validated.retries,
            mode = %validated.mode,
            "Execution configuration resolved"
        );

        Ok(validated)
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key).filter(|v| !v.is_null())
    }

    fn integer(&self, key: &str, errors: &mut Vec<String>) -> Option<i64> {
        let value = self.get(key)?;
        match to_i64(value) {
            Some(n) => Some(n),
            None => {
                errors.push(format!("{key} parameter must be an integer, got {value}"));
                None
            }
        }
    }

    fn positive(&self, key: &str, errors: &mut Vec<String>) -> Option<usize> {
        let n = self.integer(key, errors)?;
        if n <= 0 {
            errors.push(format!("{key} parameter must be > 0"));
            return None;
        }
        usize::try_from(n).ok()
    }

    fn non_negative(&self, key: &str, errors: &mut Vec<String>) -> Option<u64> {
        let n = self.integer(key, errors)?;
        if n < 0 {
            errors.push(format!("{key} parameter must be >= 0"));
            return None;
        }
        u64::try_from(n).ok()
    }

    fn flag(&self, key: &str, errors: &mut Vec<String>) -> Option<bool> {
        let value = self.get(key)?;
        match to_bool(value) {
            Some(b) => Some(b),
            None => {
                errors.push(format!("{key} parameter must be a boolean, got {value}"));
                None
            }
        }
    }

    fn validate_mode(&self, errors: &mut Vec<String>) -> Option<ExecutionUnitMode> {
        match self.get("batchMode") {
            Some(Value::String(s)) => match s.parse() {
                Ok(mode) => Some(mode),
                Err(msg) => {
                    errors.push(msg);
                    None
                }
            },
            Some(other) => {
                errors.push(format!("batchMode parameter must be a string, got {other}"));
                None
            }
            None => self
                .flag("iterateList", errors)
                .map(ExecutionUnitMode::from_iterate_list),
        }
    }

    fn validate_params(&self, errors: &mut Vec<String>) -> Option<Params> {
        match self.get("params")? {
            Value::Object(map) => Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => {
                errors.push(format!("params parameter must be a map, got {other}"));
                None
            }
        }
    }

    fn normalize(&self, builder: &mut ExecutionConfigBuilder) {
        if builder.mode != Some(ExecutionUnitMode::SingleTransaction) {
            return;
        }

        if builder.parallel.unwrap_or(false) {
            warn!("batchMode SINGLE_TRANSACTION runs sequentially; ignoring parallel=true");
        }
        if builder.retries.unwrap_or(0) > 0 {
            warn!("batchMode SINGLE_TRANSACTION does not retry; ignoring retries");
        }
        builder.parallel = Some(false);
        builder.retries = Some(0);
    }

    fn report_unknown_keys(&self) {
        for key in self.raw.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "Ignoring unknown configuration key");
            }
        }
    }
}
