use crate::error::EngineError;
use engine_core::host::GraphHost;
use tracing::warn;

pub const LOOP_CONDITION_FIELD: &str = "loopCondition";
pub const ITERATE_FIELD: &str = "iterate";
pub const ACTION_FIELD: &str = "action";

/// Checks every `(field, operation)` pair with the host and reports all
/// failures together, one line per field in the order given.
pub async fn validate_operations(
    host: &dyn GraphHost,
    operations: &[(&str, &str)],
) -> Result<(), EngineError> {
    let mut messages = Vec::new();

    for (field, operation) in operations {
        if let Err(err) = host.validate(operation).await {
            warn!(field = %field, error = %err, "Operation failed validation");
            messages.push(format!("Exception for field `{field}`, message: {}", err.message()));
        }
    }

    if messages.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(messages.join("\n")))
    }
}
