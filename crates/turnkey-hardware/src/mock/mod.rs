//! Mock device implementations for testing and development.
//!
//! These devices are controlled programmatically through their handles and
//! never touch real hardware.

pub mod actuator;
pub mod reader;

// Re-export commonly used types
pub use actuator::{MockActuator, MockActuatorHandle};
pub use reader::{MockReader, MockReaderHandle};
