//! Error types for the checkpoint store.

use thiserror::Error;

/// Result type alias for checkpoint store operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Persistence I/O failed. The caller may retry; the process stays up.
    #[error("checkpoint storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("checkpoint already exists: {0}")]
    AlreadyExists(String),

    /// Stored metadata or body could not be decoded.
    #[error("checkpoint corrupt: {0}")]
    Corrupt(String),
}

impl CheckpointError {
    /// Whether this error reflects the storage backend rather than the request.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}
