//! Hardware device trait definitions.
//!
//! Two device families matter to the daemon: badge readers that yield card
//! ids, and relay actuators that drive the barrier's lock coils.
//!
//! [`CardReader`] uses native `async fn` (Edition 2024 RPITIT), so it is not
//! object-safe; use [`AnyCardReader`](crate::devices::AnyCardReader) for
//! dynamic choice between implementations.
//!
//! [`RelayActuator`] is synchronous: the relay controller calls it from
//! `Drop` to force a channel safe when an activation future is dropped.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use std::time::Duration;

/// Badge reader producing textual card identifiers.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use turnkey_hardware::traits::CardReader;
///
/// async fn next_card<R: CardReader>(reader: &mut R) -> Option<String> {
///     reader.read_card(Duration::from_secs(5)).await
/// }
/// ```
pub trait CardReader: Send {
    /// Wait up to `timeout` for a card.
    ///
    /// "No card" and "read error" both yield `None`; implementations log
    /// their own failures.
    async fn read_card(&mut self, timeout: Duration) -> Option<String>;

    /// Human readable name used in logs.
    fn name(&self) -> &str;
}

/// Relay output driving one barrier channel.
pub trait RelayActuator: Send {
    /// Energize (`true`) or de-energize (`false`) the output.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying line cannot be written.
    fn set_energized(&mut self, energized: bool) -> Result<()>;

    /// Give the output back to the system. The output must already be safe.
    fn release(&mut self) -> Result<()>;

    /// Human readable name used in logs.
    fn name(&self) -> String;
}
