use model::execution::errors::HostError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The read operation failed while producing work items.
    #[error("Failed to read work items: {0}")]
    Source(HostError),

    #[error("Work producer panicked: {0}")]
    ProducerPanicked(String),

    /// An infrastructure failure that aborts the whole run.
    #[error("{0}")]
    Fatal(HostError),

    #[error("Batch task failed: {0}")]
    TaskJoin(String),

    #[error("Batch worker pool was closed")]
    PoolClosed,
}

impl ProcessingError {
    /// The host error behind this failure, if any.
    pub fn host_error(&self) -> Option<&HostError> {
        match self {
            ProcessingError::Source(err) | ProcessingError::Fatal(err) => Some(err),
            _ => None,
        }
    }
}
