//! Transport error types.

use flowline_types::error::CoreError;

/// Errors produced by [`Transport`](crate::Transport) operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The addressed resource does not exist.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Partition index beyond the resource's partition count.
    #[error("partition {partition} out of range for resource {resource} ({count} partitions)")]
    PartitionOutOfRange {
        resource: String,
        partition: u32,
        count: u32,
    },

    /// Operation not supported by this transport kind (e.g. `pop` on a log).
    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("transport lock poisoned")]
    LockPoisoned,
}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        match &err {
            TransportError::UnknownResource(_) => {
                CoreError::resource("UNKNOWN_RESOURCE", err.to_string())
            }
            TransportError::PartitionOutOfRange { .. } => {
                CoreError::configuration("PARTITION_OUT_OF_RANGE", err.to_string())
            }
            TransportError::Unsupported(_) => {
                CoreError::configuration("UNSUPPORTED_OPERATION", err.to_string())
            }
            TransportError::LockPoisoned => CoreError::runtime("LOCK_POISONED", err.to_string()),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TransportError>;
