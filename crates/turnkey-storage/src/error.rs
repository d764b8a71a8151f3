use std::path::PathBuf;
use thiserror::Error;

/// Storage-specific error types for the offline queue and the whitelist.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing a backing file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Data validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Blocking persistence task did not complete
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
