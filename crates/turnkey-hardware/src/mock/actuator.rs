//! Mock relay actuator recording every state change.

use crate::error::{HardwareError, Result};
use crate::traits::RelayActuator;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct ActuatorState {
    energized: bool,
    transitions: Vec<bool>,
    fail_writes: bool,
    released: bool,
}

/// Relay actuator that records transitions instead of driving a pin.
///
/// Clones share state, so a test keeps one clone (or a [`MockActuatorHandle`])
/// while the relay controller owns the other.
#[derive(Debug, Clone)]
pub struct MockActuator {
    name: String,
    state: Arc<Mutex<ActuatorState>>,
}

impl MockActuator {
    pub fn new(name: impl Into<String>) -> (Self, MockActuatorHandle) {
        let state = Arc::new(Mutex::new(ActuatorState::default()));
        let actuator = Self {
            name: name.into(),
            state: Arc::clone(&state),
        };
        (actuator, MockActuatorHandle { state })
    }
}

fn lock(state: &Mutex<ActuatorState>) -> MutexGuard<'_, ActuatorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RelayActuator for MockActuator {
    fn set_energized(&mut self, energized: bool) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(HardwareError::communication(format!(
                "{}: injected write failure",
                self.name
            )));
        }
        state.energized = energized;
        state.transitions.push(energized);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        lock(&self.state).released = true;
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Test-side view of a [`MockActuator`].
#[derive(Debug, Clone)]
pub struct MockActuatorHandle {
    state: Arc<Mutex<ActuatorState>>,
}

impl MockActuatorHandle {
    pub fn is_energized(&self) -> bool {
        lock(&self.state).energized
    }

    /// Every value written, in order.
    pub fn transitions(&self) -> Vec<bool> {
        lock(&self.state).transitions.clone()
    }

    /// Number of off→on edges seen so far.
    pub fn activations(&self) -> usize {
        let state = lock(&self.state);
        let mut previous = false;
        let mut count = 0;
        for &value in &state.transitions {
            if value && !previous {
                count += 1;
            }
            previous = value;
        }
        count
    }

    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_transitions() {
        let (mut actuator, handle) = MockActuator::new("relay-1");
        actuator.set_energized(true).unwrap();
        actuator.set_energized(false).unwrap();
        actuator.set_energized(true).unwrap();

        assert_eq!(handle.transitions(), vec![true, false, true]);
        assert_eq!(handle.activations(), 2);
        assert!(handle.is_energized());
    }

    #[test]
    fn test_injected_failure() {
        let (mut actuator, handle) = MockActuator::new("relay-1");
        handle.fail_writes(true);
        assert!(actuator.set_energized(true).is_err());
        assert!(!handle.is_energized());
        assert!(handle.transitions().is_empty());
    }

    #[test]
    fn test_release() {
        let (mut actuator, handle) = MockActuator::new("relay-2");
        actuator.release().unwrap();
        assert!(handle.is_released());
        assert_eq!(actuator.name(), "relay-2");
    }
}
