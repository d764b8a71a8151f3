use crate::constants::{CARD_LOG_PREFIX_LEN, MANUAL_OPEN_CARD_ID};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Card identifier as reported by a badge reader.
///
/// Holds the raw textual id (hex UID, badge number, ...). Comparison is
/// constant time so membership checks against the whitelist do not leak
/// how many leading characters matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(String);

impl CardId {
    /// Build a card id from reader output, trimming surrounding whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidCardId("card id is empty".to_string()));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(Error::InvalidCardId(format!(
                "card id contains control characters: {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Sentinel identity for remote manual openings.
    pub fn manual_open() -> Self {
        Self(MANUAL_OPEN_CARD_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_manual_open(&self) -> bool {
        self.0 == MANUAL_OPEN_CARD_ID
    }

    /// First characters of the id followed by an ellipsis, for log output.
    pub fn masked(&self) -> String {
        if self.0.chars().count() <= CARD_LOG_PREFIX_LEN {
            return self.0.clone();
        }
        let prefix: String = self.0.chars().take(CARD_LOG_PREFIX_LEN).collect();
        format!("{prefix}...")
    }
}

impl PartialEq for CardId {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for CardId {}

impl std::hash::Hash for CardId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CardId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Passage direction through the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" | "entry" => Ok(Direction::In),
            "out" | "exit" => Ok(Direction::Out),
            other => Err(Error::InvalidDirection(other.to_string())),
        }
    }
}

/// Kind of barrier the daemon drives.
///
/// A turnstile is bidirectional and owns two relay channels, a door only
/// opens inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Turnstile,
    Door,
}

impl DeviceKind {
    pub fn is_bidirectional(&self) -> bool {
        matches!(self, DeviceKind::Turnstile)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Turnstile => "turnstile",
            DeviceKind::Door => "door",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "turnstile" => Ok(DeviceKind::Turnstile),
            "door" => Ok(DeviceKind::Door),
            other => Err(Error::InvalidDeviceKind(other.to_string())),
        }
    }
}

/// Deployment environment. `Test` runs relays in simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Test,
    #[default]
    Production,
}

impl Environment {
    pub fn is_simulated(&self) -> bool {
        matches!(self, Environment::Test)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Test => f.write_str("test"),
            Environment::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" | "testing" | "development" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::InvalidEnvironment(other.to_string())),
        }
    }
}

/// Reachability of the backend as last observed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn from_online(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Online => f.write_str("online"),
            ConnectivityState::Offline => f.write_str("offline"),
        }
    }
}

/// One access decision, immutable once created.
///
/// Serialized as a flat JSON object; this is the element type of the
/// offline queue document and of the backend sync payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessEvent {
    device_id: String,
    card_id: CardId,
    direction: Direction,
    timestamp: DateTime<Utc>,
    authorized: bool,
    offline_mode: bool,
}

impl AccessEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        device_id: impl Into<String>,
        card_id: CardId,
        direction: Direction,
        authorized: bool,
        offline_mode: bool,
    ) -> Self {
        Self::with_timestamp(
            device_id,
            card_id,
            direction,
            Utc::now(),
            authorized,
            offline_mode,
        )
    }

    pub fn with_timestamp(
        device_id: impl Into<String>,
        card_id: CardId,
        direction: Direction,
        timestamp: DateTime<Utc>,
        authorized: bool,
        offline_mode: bool,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            card_id,
            direction,
            timestamp,
            authorized,
            offline_mode,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn card_id(&self) -> &CardId {
        &self.card_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn authorized(&self) -> bool {
        self.authorized
    }

    pub fn offline_mode(&self) -> bool {
        self.offline_mode
    }
}
