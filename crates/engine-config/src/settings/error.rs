use thiserror::Error;

/// Errors raised while resolving an execution configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// One or more keys carried unusable values.
    #[error("Invalid configuration: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// The configuration document is not valid JSON.
    #[error("Malformed configuration document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The configuration document is valid JSON but not an object.
    #[error("Configuration must be a JSON object, got {0}")]
    NotAnObject(String),
}

impl SettingsError {
    pub fn messages(&self) -> Vec<String> {
        match self {
            SettingsError::ValidationFailed(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}
