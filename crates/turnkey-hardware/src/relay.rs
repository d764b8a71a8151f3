//! Exclusive, timed relay actuation.
//!
//! Every channel runs at most one activation window at a time. A new
//! activation on a busy channel cancels the running one, waits for it to
//! de-energize the channel, then opens a fresh full-length window. Windows are
//! never queued or extended.
//!
//! Per channel the controller keeps:
//!
//! - the actuator behind a synchronous mutex, so `Drop` can reach it,
//! - the energized flag, readable without locking,
//! - the cancellation token of the pending activation, tagged with a
//!   generation so a finished window only clears its own entry,
//! - an async window lock serializing activations.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use turnkey_hardware::mock::MockActuator;
//! use turnkey_hardware::relay::RelayController;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let (actuator, handle) = MockActuator::new("relay-1");
//!     let relay = RelayController::new(vec![(1, actuator.into())], Duration::from_millis(20));
//!
//!     let outcome = relay.activate(1, None).await.unwrap();
//!     assert!(outcome.is_completed());
//!     assert_eq!(handle.transitions(), vec![true, false]);
//! }
//! ```

use crate::devices::AnyActuator;
use crate::error::{HardwareError, RelayError};
use crate::gpio::{SYSFS_GPIO_ROOT, SimulatedActuator, SysfsGpio};
use crate::traits::RelayActuator;
use crate::types::{ActivationOutcome, ChannelState, RelayInfo};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use turnkey_core::DaemonConfig;
use turnkey_core::constants::{CHANNEL_IN, CHANNEL_OUT};

/// Relay controller configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// `(channel, BCM pin)` pairs.
    pub channels: Vec<(u8, u32)>,
    pub open_duration: Duration,
    /// Use logging-only outputs instead of GPIO.
    pub simulated: bool,
    pub gpio_root: PathBuf,
}

impl From<&DaemonConfig> for RelayConfig {
    fn from(config: &DaemonConfig) -> Self {
        let mut channels = vec![(CHANNEL_IN, config.relay.channel_1_pin)];
        if config.device.kind.is_bidirectional() {
            channels.push((CHANNEL_OUT, config.relay.channel_2_pin));
        }
        Self {
            channels,
            open_duration: config.relay.open_duration,
            simulated: config.device.environment.is_simulated(),
            gpio_root: PathBuf::from(SYSFS_GPIO_ROOT),
        }
    }
}

#[derive(Debug)]
struct Pending {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug)]
struct Channel {
    id: u8,
    actuator: Mutex<AnyActuator>,
    energized: AtomicBool,
    pending: Mutex<Option<Pending>>,
    window: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Channel {
    fn new(id: u8, actuator: AnyActuator) -> Self {
        Self {
            id,
            actuator: Mutex::new(actuator),
            energized: AtomicBool::new(false),
            pending: Mutex::new(None),
            window: tokio::sync::Mutex::new(()),
        }
    }

    fn drive(&self, energized: bool) -> Result<(), HardwareError> {
        let mut actuator = lock(&self.actuator);
        actuator.set_energized(energized)?;
        self.energized.store(energized, Ordering::SeqCst);
        Ok(())
    }

    /// Energize unless `token` is already cancelled; returns whether it did.
    ///
    /// The check runs under the actuator lock, so an emergency stop that
    /// cancels first always wins, and one that cancels later always finds the
    /// channel energized and forces it off.
    fn energize_unless_cancelled(&self, token: &CancellationToken) -> Result<bool, HardwareError> {
        let mut actuator = lock(&self.actuator);
        if token.is_cancelled() {
            return Ok(false);
        }
        actuator.set_energized(true)?;
        self.energized.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn replace_pending(&self, pending: Pending) -> Option<Pending> {
        lock(&self.pending).replace(pending)
    }

    fn clear_pending(&self, generation: u64) {
        let mut pending = lock(&self.pending);
        if pending.as_ref().is_some_and(|p| p.generation == generation) {
            *pending = None;
        }
    }

    fn cancel_pending(&self) -> bool {
        match lock(&self.pending).as_ref() {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    fn has_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

/// De-energizes its channel when dropped while armed.
///
/// Armed for the whole open window, so dropping the activation future (for
/// instance from an outer `timeout`) still leaves the channel safe.
struct SafeStateGuard {
    channel: Arc<Channel>,
    generation: u64,
    armed: bool,
}

impl SafeStateGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SafeStateGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.channel.drive(false) {
            error!(channel = self.channel.id, error = %e, "failed to de-energize abandoned relay");
        }
        self.channel.clear_pending(self.generation);
        debug!(channel = self.channel.id, "relay forced safe on drop");
    }
}

/// Timed, exclusive actuation of relay channels.
#[derive(Debug)]
pub struct RelayController {
    channels: BTreeMap<u8, Arc<Channel>>,
    default_duration: Duration,
    next_generation: AtomicU64,
}

impl RelayController {
    /// Build a controller over already opened actuators.
    pub fn new(channels: Vec<(u8, AnyActuator)>, default_duration: Duration) -> Self {
        let channels = channels
            .into_iter()
            .map(|(id, actuator)| (id, Arc::new(Channel::new(id, actuator))))
            .collect();
        Self {
            channels,
            default_duration,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Open every configured output.
    ///
    /// # Errors
    ///
    /// Returns an error if a GPIO line cannot be exported. Callers outside
    /// simulation treat this as fatal.
    pub fn from_config(config: &RelayConfig) -> Result<Self, HardwareError> {
        let mut channels = Vec::with_capacity(config.channels.len());
        for &(channel, pin) in &config.channels {
            let actuator = if config.simulated {
                AnyActuator::Simulated(SimulatedActuator::new(pin))
            } else {
                AnyActuator::Gpio(SysfsGpio::open_at(&config.gpio_root, pin)?)
            };
            channels.push((channel, actuator));
        }
        info!(
            channels = config.channels.len(),
            simulated = config.simulated,
            "relay controller initialized"
        );
        Ok(Self::new(channels, config.open_duration))
    }

    fn channel(&self, channel: u8) -> Result<&Arc<Channel>, RelayError> {
        self.channels
            .get(&channel)
            .ok_or_else(|| RelayError::unknown_channel(channel))
    }

    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }

    /// Energize `channel` for `duration` (the configured default when `None`).
    ///
    /// Resolves when the window elapses or is cancelled; the channel is
    /// de-energized in both cases before this returns.
    ///
    /// # Errors
    ///
    /// [`RelayError::UnknownChannel`] without side effects, or
    /// [`RelayError::Actuator`] if the output cannot be written.
    pub async fn activate(
        &self,
        channel: u8,
        duration: Option<Duration>,
    ) -> Result<ActivationOutcome, RelayError> {
        let ch = Arc::clone(self.channel(channel)?);
        let duration = duration.unwrap_or(self.default_duration);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        if let Some(previous) = ch.replace_pending(Pending {
            generation,
            token: token.clone(),
        }) {
            debug!(channel, "superseding pending relay activation");
            previous.token.cancel();
        }

        let _window = ch.window.lock().await;

        let energized = match ch.energize_unless_cancelled(&token) {
            Ok(energized) => energized,
            Err(e) => {
                if let Err(off) = ch.drive(false) {
                    error!(channel, error = %off, "failed to de-energize after failed activation");
                }
                ch.clear_pending(generation);
                return Err(RelayError::actuator(channel, e));
            }
        };
        if !energized {
            ch.clear_pending(generation);
            return Ok(ActivationOutcome::Cancelled);
        }

        let guard = SafeStateGuard {
            channel: Arc::clone(&ch),
            generation,
            armed: true,
        };
        info!(channel, duration_ms = duration.as_millis() as u64, "relay energized");

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => ActivationOutcome::Cancelled,
            _ = tokio::time::sleep(duration) => ActivationOutcome::Completed,
        };

        let result = ch.drive(false);
        guard.disarm();
        ch.clear_pending(generation);
        result.map_err(|e| RelayError::actuator(channel, e))?;

        match outcome {
            ActivationOutcome::Completed => debug!(channel, "relay window elapsed"),
            ActivationOutcome::Cancelled => debug!(channel, "relay window cancelled"),
        }
        Ok(outcome)
    }

    /// Cancel every pending activation and force every channel safe.
    ///
    /// All channels are attempted; the first failure is returned.
    pub fn emergency_stop_all(&self) -> Result<(), RelayError> {
        warn!("relay emergency stop");
        let mut first_error = None;
        for (&id, ch) in &self.channels {
            ch.cancel_pending();
            if let Err(e) = ch.drive(false) {
                error!(channel = id, error = %e, "emergency stop failed to de-energize channel");
                first_error.get_or_insert(RelayError::actuator(id, e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Energized state of `channel`, `None` if unknown.
    pub fn get_state(&self, channel: u8) -> Option<bool> {
        self.channels
            .get(&channel)
            .map(|ch| ch.energized.load(Ordering::SeqCst))
    }

    pub fn channels(&self) -> Vec<u8> {
        self.channels.keys().copied().collect()
    }

    pub fn info(&self) -> RelayInfo {
        let channels = self
            .channels
            .values()
            .map(|ch| ChannelState {
                channel: ch.id,
                output: lock(&ch.actuator).name(),
                energized: ch.energized.load(Ordering::SeqCst),
                pending: ch.has_pending(),
            })
            .collect();
        RelayInfo { channels }
    }

    /// Stop everything and hand the outputs back to the system.
    pub fn release(&self) -> Result<(), RelayError> {
        let stopped = self.emergency_stop_all();
        for (&id, ch) in &self.channels {
            if let Err(e) = lock(&ch.actuator).release() {
                warn!(channel = id, error = %e, "failed to release relay output");
            }
        }
        info!("relay outputs released");
        stopped
    }
}
