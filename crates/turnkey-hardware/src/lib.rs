//! Hardware layer of the turnstile daemon.
//!
//! Two device families are abstracted here:
//!
//! - **Badge readers** ([`CardReader`]) yield textual card ids. Available
//!   implementations are [`MockReader`](mock::MockReader) and the
//!   line-oriented [`LineReader`](line_reader::LineReader).
//! - **Relay actuators** ([`RelayActuator`]) drive the barrier lock coils:
//!   [`SysfsGpio`](gpio::SysfsGpio) on real hardware,
//!   [`SimulatedActuator`](gpio::SimulatedActuator) in the `test` environment and
//!   [`MockActuator`](mock::MockActuator) in tests.
//!
//! On top of the actuators, [`RelayController`] provides exclusive, timed
//! activation windows per channel with emergency stop.
//!
//! # Dispatch
//!
//! [`CardReader`] uses native `async fn` in traits (Rust 1.90 + Edition 2024),
//! which is not object-safe. Dynamic choice between implementations goes
//! through the enum wrappers in [`devices`].
//!
//! # Error Handling
//!
//! Device operations return [`Result<T>`][error::Result] with
//! [`HardwareError`]; relay operations return [`RelayError`].
//!
//! [`CardReader`]: traits::CardReader
//! [`RelayActuator`]: traits::RelayActuator

pub mod devices;
pub mod error;
pub mod gpio;
pub mod line_reader;
pub mod mock;
pub mod relay;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::{AnyActuator, AnyCardReader};
pub use error::{HardwareError, RelayError, Result};
pub use relay::{RelayConfig, RelayController};
pub use traits::{CardReader, RelayActuator};
pub use types::{ActivationOutcome, ChannelState, RelayInfo};
