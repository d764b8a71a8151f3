use thiserror::Error;
use turnkey_hardware::{HardwareError, RelayError};
use turnkey_network::BackendError;
use turnkey_storage::StorageError;
use turnkey_updater::UpdateError;

/// Errors surfaced by the controller's activities.
///
/// Loop iterations return these to the loop boundary, where they are logged
/// and followed by a short backoff.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Badge data that is not a usable card identifier
    #[error("Invalid card: {0}")]
    InvalidCard(#[from] turnkey_core::Error),

    /// Relay actuation failed
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Hardware could not be opened
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Offline queue or whitelist persistence failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Backend call failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Update session failed
    #[error("Update error: {0}")]
    Update(#[from] UpdateError),
}

/// Specialized result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: ControllerError = RelayError::unknown_channel(7).into();
        assert!(matches!(err, ControllerError::Relay(_)));

        let err: ControllerError = BackendError::unavailable("down").into();
        assert_eq!(err.to_string(), "Backend error: Backend unavailable: down");
    }
}
