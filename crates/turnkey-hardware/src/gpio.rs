//! Relay outputs backed by Linux GPIO lines.
//!
//! [`SysfsGpio`] drives a pin through the sysfs interface:
//!
//! ```text
//! /sys/class/gpio/export            <- "18"
//! /sys/class/gpio/gpio18/direction  <- "out"
//! /sys/class/gpio/gpio18/value      <- "1" | "0"
//! /sys/class/gpio/unexport          <- "18"
//! ```
//!
//! [`SimulatedActuator`] only logs, and is used in the `test` environment.

use crate::error::{HardwareError, Result};
use crate::traits::RelayActuator;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default sysfs GPIO root.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Relay output on a sysfs-exported GPIO pin (BCM numbering).
#[derive(Debug)]
pub struct SysfsGpio {
    pin: u32,
    root: PathBuf,
    exported: bool,
}

impl SysfsGpio {
    /// Export `pin` under the default sysfs root and drive it low.
    pub fn open(pin: u32) -> Result<Self> {
        Self::open_at(SYSFS_GPIO_ROOT, pin)
    }

    /// Export `pin` under `root` and drive it low.
    ///
    /// An already exported pin is reused.
    pub fn open_at(root: impl AsRef<Path>, pin: u32) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let pin_dir = root.join(format!("gpio{pin}"));

        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(|e| {
                HardwareError::initialization_failed(format!("cannot export gpio{pin}: {e}"))
            })?;
        }

        fs::write(pin_dir.join("direction"), "out").map_err(|e| {
            HardwareError::initialization_failed(format!(
                "cannot set gpio{pin} direction: {e}"
            ))
        })?;

        let mut gpio = Self {
            pin,
            root,
            exported: true,
        };
        gpio.set_energized(false)?;
        info!(pin, "GPIO relay output ready");
        Ok(gpio)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin)).join("value")
    }
}

impl RelayActuator for SysfsGpio {
    fn set_energized(&mut self, energized: bool) -> Result<()> {
        if !self.exported {
            return Err(HardwareError::disconnected(format!("gpio{}", self.pin)));
        }
        let value = if energized { "1" } else { "0" };
        fs::write(self.value_path(), value).map_err(|e| {
            HardwareError::communication(format!("gpio{} write failed: {e}", self.pin))
        })
    }

    fn release(&mut self) -> Result<()> {
        if !self.exported {
            return Ok(());
        }
        self.exported = false;
        fs::write(self.root.join("unexport"), self.pin.to_string())?;
        debug!(pin = self.pin, "GPIO unexported");
        Ok(())
    }

    fn name(&self) -> String {
        format!("gpio{}", self.pin)
    }
}

/// Relay output that only logs its state changes.
#[derive(Debug)]
pub struct SimulatedActuator {
    pin: u32,
}

impl SimulatedActuator {
    pub fn new(pin: u32) -> Self {
        info!(pin, "simulated relay output ready");
        Self { pin }
    }
}

impl RelayActuator for SimulatedActuator {
    fn set_energized(&mut self, energized: bool) -> Result<()> {
        debug!(
            pin = self.pin,
            state = if energized { "HIGH" } else { "LOW" },
            "simulated relay write"
        );
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> String {
        format!("sim-gpio{}", self.pin)
    }
}
