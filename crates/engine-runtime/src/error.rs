use engine_config::settings::error::SettingsError;
use engine_processing::error::ProcessingError;
use model::execution::errors::HostError;
use thiserror::Error;

/// Errors surfaced by the public engine calls.
///
/// Partial batch failures are never reported here; they are part of the
/// returned summary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// One or more operations are malformed. Raised before any batch runs.
    #[error("{0}")]
    Validation(String),

    /// The configuration could not be resolved.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// The read operation failed while producing work items.
    #[error("Failed to read work items: {0}")]
    Source(HostError),

    /// The host could not run transactions at all.
    #[error("{0}")]
    Host(HostError),

    /// A background task panicked or was aborted.
    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl From<ProcessingError> for EngineError {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::Source(err) => EngineError::Source(err),
            ProcessingError::Fatal(err) => EngineError::Host(err),
            ProcessingError::ProducerPanicked(msg) | ProcessingError::TaskJoin(msg) => {
                EngineError::TaskJoin(msg)
            }
            other @ ProcessingError::PoolClosed => EngineError::TaskJoin(other.to_string()),
        }
    }
}
