//! Error types for hardware operations.
//!
//! [`HardwareError`] covers device-level failures (a reader that vanished, a
//! GPIO write that was refused). [`RelayError`] is what callers of the
//! [`RelayController`](crate::relay::RelayController) see.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Device communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Device initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }
}

/// Errors returned by relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The channel is not part of this controller.
    #[error("Unknown relay channel: {channel}")]
    UnknownChannel { channel: u8 },

    /// The actuator refused to change state.
    #[error("Relay channel {channel} actuator failure: {source}")]
    Actuator {
        channel: u8,
        #[source]
        source: HardwareError,
    },
}

impl RelayError {
    pub fn unknown_channel(channel: u8) -> Self {
        Self::UnknownChannel { channel }
    }

    pub fn actuator(channel: u8, source: HardwareError) -> Self {
        Self::Actuator { channel, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_error() {
        let error = HardwareError::disconnected("/dev/ttyACM0");
        assert!(matches!(error, HardwareError::Disconnected { .. }));
        assert_eq!(error.to_string(), "Device disconnected: /dev/ttyACM0");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "gpio export");
        let error: HardwareError = io.into();
        assert!(matches!(error, HardwareError::Io(_)));
        assert!(error.to_string().contains("gpio export"));
    }

    #[test]
    fn test_relay_errors() {
        assert_eq!(
            RelayError::unknown_channel(9).to_string(),
            "Unknown relay channel: 9"
        );

        let error = RelayError::actuator(1, HardwareError::communication("write refused"));
        assert!(error.to_string().contains("channel 1"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
