use thiserror::Error;

/// Errors raised while talking to the access-control backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level failure (DNS, connect, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Backend returned {status} for {endpoint}")]
    Status { status: u16, endpoint: String },

    /// Backend answered with a body we cannot use
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// Backend is unreachable or simulated offline
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Client could not be built from configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BackendError {
    pub fn status(status: u16, endpoint: impl Into<String>) -> Self {
        Self::Status {
            status,
            endpoint: endpoint.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Unavailable(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse(_) | Self::Configuration(_) => false,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by remote-command transports.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Connection attempt timed out
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// Connection was lost during operation
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Line framing error
    #[error("Codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// Message could not be encoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
