use std::collections::BTreeMap;

pub use serde_json::Value;

/// Named parameters bound to an operation.
pub type Params = BTreeMap<String, Value>;

/// Merges `overlay` on top of `base`; keys in `overlay` win.
pub fn merge_params(base: &Params, overlay: Params) -> Params {
    if base.is_empty() {
        return overlay;
    }
    let mut merged = base.clone();
    merged.extend(overlay);
    merged
}

/// Loose truthiness used for loop conditions: `null`, `false`, zero or negative
/// numbers, empty strings and empty collections are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Reads an integer out of a number or a numeric string.
pub fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Reads a boolean out of a bool or a `"true"`/`"false"` string.
pub fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}
