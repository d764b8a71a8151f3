use crate::phase::UpdatePhase;
use std::path::PathBuf;
use thiserror::Error;
use turnkey_network::BackendError;

/// Errors raised while checking for or applying an update.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Backend call failed (metadata, download)
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Package digest differs from the declared hash
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Package length differs from the declared size
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Archive format is neither tar.gz nor zip
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Archive could not be read or unpacked
    #[error("Archive error: {0}")]
    Archive(String),

    /// Update hook or installer exited unsuccessfully
    #[error("{command} failed ({status}): {stderr}")]
    Hook {
        command: String,
        status: String,
        stderr: String,
    },

    /// Filesystem operation failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Session tried an illegal phase change
    #[error("Invalid update phase transition: {from} -> {to}")]
    InvalidPhaseTransition { from: UpdatePhase, to: UpdatePhase },

    /// No backup archive to restore from
    #[error("No backup available in {}", .0.display())]
    NoBackup(PathBuf),

    /// Blocking worker panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl UpdateError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn archive(message: impl std::fmt::Display) -> Self {
        Self::Archive(message.to_string())
    }
}

impl From<tokio::task::JoinError> for UpdateError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Specialized result type for update operations
pub type UpdateResult<T> = Result<T, UpdateError>;
