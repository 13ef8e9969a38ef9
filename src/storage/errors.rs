//! # Storage Errors

use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Loose-directory storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Submission not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid metadata: {0}")]
    Metadata(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl StorageError {
    pub(crate) fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        StorageError::IoError(format!("{}: {}", context, err))
    }
}
