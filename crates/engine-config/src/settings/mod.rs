use crate::settings::{
    error::SettingsError, validated::ExecutionConfig, validator::SettingsValidator,
};
use model::core::value::Value;
use serde_json::Map;

pub mod error;
pub mod mode;
pub mod validated;
pub mod validator;

/// Resolves a configuration map, as passed by callers of the engine.
pub fn from_map(raw: &Map<String, Value>) -> Result<ExecutionConfig, SettingsError> {
    SettingsValidator::new(raw).validate()
}

/// Resolves a configuration given as a JSON document. `null` and the empty
/// string both mean "all defaults".
pub fn from_json_str(raw: &str) -> Result<ExecutionConfig, SettingsError> {
    if raw.trim().is_empty() {
        return from_map(&Map::new());
    }

    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => from_map(&map),
        Value::Null => from_map(&Map::new()),
        other => Err(SettingsError::NotAnObject(other.to_string())),
    }
}
