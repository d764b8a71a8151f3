//! Enum wrappers for hardware device dispatch.
//!
//! Native `async fn` in traits (RPITIT, Edition 2024) are not object-safe, so
//! `Box<dyn CardReader>` is not available. These enums give concrete type
//! dispatch instead, and keep the futures `Send` for spawned tasks.
//!
//! # Examples
//!
//! ```
//! use turnkey_hardware::devices::AnyCardReader;
//! use turnkey_hardware::mock::MockReader;
//!
//! let (reader, _handle) = MockReader::new();
//! let any_reader = AnyCardReader::Mock(reader);
//! ```

use crate::error::Result;
use crate::gpio::{SimulatedActuator, SysfsGpio};
use crate::line_reader::LineReader;
use crate::mock::{MockActuator, MockReader};
use crate::traits::{CardReader, RelayActuator};
use std::time::Duration;
use tracing::warn;
use turnkey_core::CardId;

/// Enum wrapper for badge reader dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyCardReader {
    /// Mock reader for development and testing.
    Mock(MockReader),
    /// Reader emitting one card id per line on a device file.
    Line(LineReader),
}

/// Dispatches to the device and drops reads that cannot name a card
/// (blank, or carrying control characters).
impl CardReader for AnyCardReader {
    async fn read_card(&mut self, timeout: Duration) -> Option<String> {
        let raw = match self {
            Self::Mock(device) => device.read_card(timeout).await,
            Self::Line(device) => device.read_card(timeout).await,
        }?;
        match CardId::new(raw.as_str()) {
            Ok(_) => Some(raw),
            Err(e) => {
                warn!(reader = self.name(), error = %e, "unusable card read discarded");
                None
            }
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Mock(device) => device.name(),
            Self::Line(device) => device.name(),
        }
    }
}

impl From<MockReader> for AnyCardReader {
    fn from(reader: MockReader) -> Self {
        Self::Mock(reader)
    }
}

impl From<LineReader> for AnyCardReader {
    fn from(reader: LineReader) -> Self {
        Self::Line(reader)
    }
}

/// Enum wrapper for relay actuator dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyActuator {
    /// Real output on a sysfs GPIO line.
    Gpio(SysfsGpio),
    /// Logging-only output for the `test` environment.
    Simulated(SimulatedActuator),
    /// Recording output for unit and integration tests.
    Mock(MockActuator),
}

impl RelayActuator for AnyActuator {
    fn set_energized(&mut self, energized: bool) -> Result<()> {
        match self {
            Self::Gpio(device) => device.set_energized(energized),
            Self::Simulated(device) => device.set_energized(energized),
            Self::Mock(device) => device.set_energized(energized),
        }
    }

    fn release(&mut self) -> Result<()> {
        match self {
            Self::Gpio(device) => device.release(),
            Self::Simulated(device) => device.release(),
            Self::Mock(device) => device.release(),
        }
    }

    fn name(&self) -> String {
        match self {
            Self::Gpio(device) => device.name(),
            Self::Simulated(device) => device.name(),
            Self::Mock(device) => device.name(),
        }
    }
}

impl From<MockActuator> for AnyActuator {
    fn from(actuator: MockActuator) -> Self {
        Self::Mock(actuator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_any_reader_dispatch() {
        let (reader, handle) = MockReader::with_name("in");
        let mut any: AnyCardReader = reader.into();
        handle.present_card("42").await.unwrap();

        assert_eq!(any.name(), "in");
        assert_eq!(
            any.read_card(Duration::from_millis(10)).await.as_deref(),
            Some("42")
        );
    }

    #[tokio::test]
    async fn test_unusable_reads_are_dropped() {
        let (reader, handle) = MockReader::with_name("in");
        let mut any: AnyCardReader = reader.into();
        for raw in ["   ", "12\u{7}34", "\u{1b}[A", "04A1B2C3"] {
            handle.present_card(raw).await.unwrap();
        }

        let timeout = Duration::from_millis(10);
        assert!(any.read_card(timeout).await.is_none());
        assert!(any.read_card(timeout).await.is_none());
        assert!(any.read_card(timeout).await.is_none());
        assert_eq!(any.read_card(timeout).await.as_deref(), Some("04A1B2C3"));
    }

    #[test]
    fn test_any_actuator_dispatch() {
        let (actuator, handle) = MockActuator::new("relay-1");
        let mut any: AnyActuator = actuator.into();
        any.set_energized(true).unwrap();
        assert!(handle.is_energized());
        assert_eq!(any.name(), "relay-1");
    }
}
