use thiserror::Error;

/// Errors reported by the host database collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The operation text could not be compiled (unknown function, unbound variable, ...).
    #[error("{0}")]
    Invalid(String),

    /// The operation failed while running.
    #[error("{0}")]
    Operation(String),

    /// The transaction system cannot be reached.
    #[error("Transaction system unavailable: {0}")]
    Unavailable(String),
}

impl HostError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        HostError::Invalid(msg.into())
    }

    pub fn operation(msg: impl Into<String>) -> Self {
        HostError::Operation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        HostError::Unavailable(msg.into())
    }

    /// Message without the category prefix; used as histogram key.
    pub fn message(&self) -> &str {
        match self {
            HostError::Invalid(msg)
            | HostError::Operation(msg)
            | HostError::Unavailable(msg) => msg,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, HostError::Unavailable(_))
    }
}
