//! Common types shared by the relay controller and its callers.

use serde::{Deserialize, Serialize};

/// How a relay activation window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationOutcome {
    /// The full window elapsed and the channel was de-energized.
    Completed,
    /// The window was cut short by a newer activation or an emergency stop.
    Cancelled,
}

impl ActivationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Snapshot of one relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel: u8,
    pub output: String,
    pub energized: bool,
    pub pending: bool,
}

/// Snapshot of every relay channel, ordered by channel number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInfo {
    pub channels: Vec<ChannelState>,
}

impl RelayInfo {
    pub fn available_channels(&self) -> Vec<u8> {
        self.channels.iter().map(|c| c.channel).collect()
    }

    pub fn any_energized(&self) -> bool {
        self.channels.iter().any(|c| c.energized)
    }
}
