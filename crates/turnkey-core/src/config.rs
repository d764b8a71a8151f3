//! Daemon configuration.
//!
//! [`DaemonConfig`] is assembled once at startup in three layers:
//!
//! 1. built-in defaults from [`constants`](crate::constants),
//! 2. an optional TOML file,
//! 3. environment variable overrides,
//!
//! and then validated. The result is immutable and shared behind an `Arc`;
//! components derive their own narrower configs from it.
//!
//! # Example
//!
//! ```toml
//! [device]
//! id = "turnstile_lobby"
//! kind = "turnstile"
//! environment = "production"
//!
//! [backend]
//! url = "https://access.example.com/api"
//! api_key = "secret"
//! connection_timeout = 10.0
//! download_timeout = 300.0
//!
//! [relay]
//! open_duration = 3.0
//! ```

use crate::constants::*;
use crate::error::{Error, Result};
use crate::types::{DeviceKind, Environment};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Serde adapter storing a [`Duration`] as fractional seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

fn default_device_id() -> String {
    DEFAULT_DEVICE_ID.to_string()
}

fn default_backend_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_connection_timeout() -> Duration {
    Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS)
}

fn default_download_timeout() -> Duration {
    Duration::from_millis(DEFAULT_DOWNLOAD_TIMEOUT_MS)
}

fn default_relay_pin_1() -> u32 {
    DEFAULT_RELAY_PIN_1
}

fn default_relay_pin_2() -> u32 {
    DEFAULT_RELAY_PIN_2
}

fn default_open_duration() -> Duration {
    Duration::from_millis(DEFAULT_RELAY_OPEN_DURATION_MS)
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(DEFAULT_READER_TIMEOUT_MS)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
}

fn default_true() -> bool {
    true
}

fn default_max_offline_logs() -> usize {
    DEFAULT_MAX_OFFLINE_LOGS
}

fn default_whitelist_file() -> PathBuf {
    PathBuf::from("data/whitelist.json")
}

fn default_offline_logs_file() -> PathBuf {
    PathBuf::from("data/offline_logs.json")
}

fn default_connectivity_interval() -> Duration {
    Duration::from_secs(DEFAULT_CONNECTIVITY_INTERVAL_SECS)
}

fn default_update_check_interval() -> Duration {
    Duration::from_secs(DEFAULT_UPDATE_CHECK_INTERVAL_SECS)
}

fn default_app_dir() -> PathBuf {
    PathBuf::from("/opt/turnkey/app")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/opt/turnkey/backups")
}

fn default_update_dir() -> PathBuf {
    PathBuf::from("/tmp/turnkey_updates")
}

fn default_restart_marker() -> PathBuf {
    PathBuf::from("/tmp/turnkey_restart_required")
}

fn default_dependency_manifest() -> String {
    DEFAULT_DEPENDENCY_MANIFEST.to_string()
}

fn default_dependency_installer() -> Vec<String> {
    vec!["pip3".to_string(), "install".to_string(), "-r".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_shutdown_grace() -> Duration {
    Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS)
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub reader: ReaderSection,
    #[serde(default)]
    pub access: AccessSection,
    #[serde(default)]
    pub update: UpdateSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    #[serde(default = "default_device_id")]
    pub id: String,
    #[serde(default)]
    pub kind: DeviceKind,
    #[serde(default)]
    pub environment: Environment,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            kind: DeviceKind::default(),
            environment: Environment::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_connection_timeout", with = "duration_secs")]
    pub connection_timeout: Duration,
    /// Upper bound for an update package download.
    #[serde(default = "default_download_timeout", with = "duration_secs")]
    pub download_timeout: Duration,
    /// Address of the remote command transport; no intake when unset.
    #[serde(default)]
    pub command_addr: Option<String>,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            api_key: String::new(),
            connection_timeout: default_connection_timeout(),
            download_timeout: default_download_timeout(),
            command_addr: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_relay_pin_1")]
    pub channel_1_pin: u32,
    #[serde(default = "default_relay_pin_2")]
    pub channel_2_pin: u32,
    #[serde(default = "default_open_duration", with = "duration_secs")]
    pub open_duration: Duration,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            channel_1_pin: default_relay_pin_1(),
            channel_2_pin: default_relay_pin_2(),
            open_duration: default_open_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderSection {
    /// Line-oriented device for the inbound reader.
    #[serde(default)]
    pub in_device: Option<PathBuf>,
    /// Line-oriented device for the outbound reader.
    #[serde(default)]
    pub out_device: Option<PathBuf>,
    #[serde(default = "default_read_timeout", with = "duration_secs")]
    pub read_timeout: Duration,
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,
}

impl Default for ReaderSection {
    fn default() -> Self {
        Self {
            in_device: None,
            out_device: None,
            read_timeout: default_read_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessSection {
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default = "default_max_offline_logs")]
    pub max_offline_logs: usize,
    #[serde(default = "default_whitelist_file")]
    pub whitelist_file: PathBuf,
    #[serde(default = "default_offline_logs_file")]
    pub offline_logs_file: PathBuf,
    #[serde(default = "default_connectivity_interval", with = "duration_secs")]
    pub connectivity_interval: Duration,
    #[serde(default = "default_shutdown_grace", with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for AccessSection {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            max_offline_logs: default_max_offline_logs(),
            whitelist_file: default_whitelist_file(),
            offline_logs_file: default_offline_logs_file(),
            connectivity_interval: default_connectivity_interval(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_update_check_interval", with = "duration_secs")]
    pub check_interval: Duration,
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_update_dir")]
    pub update_dir: PathBuf,
    #[serde(default = "default_restart_marker")]
    pub restart_marker: PathBuf,
    /// Version marker; `<app_dir>/VERSION` when unset.
    #[serde(default)]
    pub version_file: Option<PathBuf>,
    #[serde(default = "default_dependency_manifest")]
    pub dependency_manifest: String,
    /// Installer command; the manifest path is appended as last argument.
    #[serde(default = "default_dependency_installer")]
    pub dependency_installer: Vec<String>,
}

impl UpdateSection {
    pub fn version_file(&self) -> PathBuf {
        self.version_file
            .clone()
            .unwrap_or_else(|| self.app_dir.join(VERSION_FILE_NAME))
    }
}

impl Default for UpdateSection {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: default_update_check_interval(),
            app_dir: default_app_dir(),
            backup_dir: default_backup_dir(),
            update_dir: default_update_dir(),
            restart_marker: default_restart_marker(),
            version_file: None,
            dependency_manifest: default_dependency_manifest(),
            dependency_installer: default_dependency_installer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
        }
    }
}

impl DaemonConfig {
    /// Load defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing sections and keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents).map_err(|e| match e {
            Error::Config(message) => Error::ConfigParse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Empty values are ignored, so an exported-but-blank variable never
    /// clears a configured value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DEVICE_ID") {
            self.device.id = v;
        }
        if let Some(v) = get("DEVICE_TYPE") {
            self.device.kind = v.parse()?;
        }
        if let Some(v) = get("ENVIRONMENT") {
            self.device.environment = v.parse()?;
        }
        if let Some(v) = get("BACKEND_URL") {
            self.backend.url = v;
        }
        if let Some(v) = get("API_KEY") {
            self.backend.api_key = v;
        }
        if let Some(v) = get("COMMAND_ADDR") {
            self.backend.command_addr = Some(v);
        }
        if let Some(v) = get("CONNECTION_TIMEOUT") {
            self.backend.connection_timeout = parse_secs("CONNECTION_TIMEOUT", &v)?;
        }
        if let Some(v) = get("DOWNLOAD_TIMEOUT") {
            self.backend.download_timeout = parse_secs("DOWNLOAD_TIMEOUT", &v)?;
        }
        if let Some(v) = get("RELAY_CHANNEL_1") {
            self.relay.channel_1_pin = parse_value("RELAY_CHANNEL_1", &v)?;
        }
        if let Some(v) = get("RELAY_CHANNEL_2") {
            self.relay.channel_2_pin = parse_value("RELAY_CHANNEL_2", &v)?;
        }
        if let Some(v) = get("RELAY_OPEN_DURATION") {
            self.relay.open_duration = parse_secs("RELAY_OPEN_DURATION", &v)?;
        }
        if let Some(v) = get("NFC_READ_TIMEOUT") {
            self.reader.read_timeout = parse_secs("NFC_READ_TIMEOUT", &v)?;
        }
        if let Some(v) = get("READER_IN_DEVICE") {
            self.reader.in_device = Some(PathBuf::from(v));
        }
        if let Some(v) = get("READER_OUT_DEVICE") {
            self.reader.out_device = Some(PathBuf::from(v));
        }
        if let Some(v) = get("FALLBACK_MODE_ENABLED") {
            self.access.fallback_enabled = parse_bool("FALLBACK_MODE_ENABLED", &v)?;
        }
        if let Some(v) = get("MAX_OFFLINE_LOGS") {
            self.access.max_offline_logs = parse_value("MAX_OFFLINE_LOGS", &v)?;
        }
        if let Some(v) = get("WHITELIST_FILE") {
            self.access.whitelist_file = PathBuf::from(v);
        }
        if let Some(v) = get("OFFLINE_LOGS_FILE") {
            self.access.offline_logs_file = PathBuf::from(v);
        }
        if let Some(v) = get("AUTO_UPDATE_ENABLED") {
            self.update.enabled = parse_bool("AUTO_UPDATE_ENABLED", &v)?;
        }
        if let Some(v) = get("UPDATE_CHECK_INTERVAL") {
            self.update.check_interval = parse_secs("UPDATE_CHECK_INTERVAL", &v)?;
        }
        if let Some(v) = get("APP_DIR") {
            self.update.app_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BACKUP_DIR") {
            self.update.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("UPDATE_DIR") {
            self.update.update_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RESTART_MARKER") {
            self.update.restart_marker = PathBuf::from(v);
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.to_ascii_lowercase();
        }
        if let Some(v) = get("LOG_DIR") {
            self.logging.dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Check the invariants every component relies on.
    pub fn validate(&self) -> Result<()> {
        if self.device.id.trim().is_empty() {
            return Err(Error::MissingConfig("device.id (DEVICE_ID)".to_string()));
        }
        if self.backend.url.trim().is_empty() {
            return Err(Error::MissingConfig("backend.url (BACKEND_URL)".to_string()));
        }
        if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://") {
            return Err(Error::Config(format!(
                "backend url must use http or https: {}",
                self.backend.url
            )));
        }
        if self.backend.api_key.trim().is_empty() {
            return Err(Error::MissingConfig("backend.api_key (API_KEY)".to_string()));
        }
        if self.relay.channel_1_pin == self.relay.channel_2_pin {
            return Err(Error::Config(format!(
                "relay channels must use distinct pins, both are {}",
                self.relay.channel_1_pin
            )));
        }

        let positive = [
            ("relay.open_duration", self.relay.open_duration),
            ("reader.read_timeout", self.reader.read_timeout),
            ("reader.poll_interval", self.reader.poll_interval),
            ("backend.connection_timeout", self.backend.connection_timeout),
            ("backend.download_timeout", self.backend.download_timeout),
            ("access.connectivity_interval", self.access.connectivity_interval),
            ("update.check_interval", self.update.check_interval),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }

        if self.access.max_offline_logs == 0 {
            return Err(Error::Config(
                "access.max_offline_logs must be at least 1".to_string(),
            ));
        }
        if self.update.dependency_installer.is_empty() {
            return Err(Error::Config(
                "update.dependency_installer must name a program".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: invalid value {value:?}")))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: f64 = parse_value(key, value)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("{key}: invalid duration {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key}: invalid boolean {value:?}"))),
    }
}
