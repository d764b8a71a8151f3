//! Default values for the turnstile daemon.
//!
//! Every tunable in [`DaemonConfig`](crate::config::DaemonConfig) starts from one
//! of these constants. They mirror the values the devices ship with in the field,
//! so changing them changes the out-of-the-box behaviour of every installation.
//!
//! # Usage
//!
//! ```
//! use turnkey_core::constants::*;
//! use std::time::Duration;
//!
//! let poll = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);
//! assert_eq!(poll, Duration::from_millis(100));
//! assert_eq!(MANUAL_OPEN_CARD_ID, "MANUAL_OPEN");
//! ```

// ============================================================================
// Identity
// ============================================================================

/// Device identifier used when none is configured.
pub const DEFAULT_DEVICE_ID: &str = "turnstile_001";

/// Sentinel card identity recorded for remote "manual open" commands.
///
/// Manual openings bypass authorization but still produce an access event;
/// this value marks them in the offline queue and is excluded from
/// unique-card statistics.
pub const MANUAL_OPEN_CARD_ID: &str = "MANUAL_OPEN";

/// Number of card id characters shown in logs before masking.
pub const CARD_LOG_PREFIX_LEN: usize = 8;

// ============================================================================
// Relay Channels
// ============================================================================

/// Relay channel driving the inbound direction.
pub const CHANNEL_IN: u8 = 1;

/// Relay channel driving the outbound direction (turnstiles only).
pub const CHANNEL_OUT: u8 = 2;

/// Default BCM pin for relay channel 1.
pub const DEFAULT_RELAY_PIN_1: u32 = 18;

/// Default BCM pin for relay channel 2.
pub const DEFAULT_RELAY_PIN_2: u32 = 19;

/// Default time a relay stays energized after a grant, in milliseconds.
pub const DEFAULT_RELAY_OPEN_DURATION_MS: u64 = 3000;

// ============================================================================
// Timing
// ============================================================================

/// Period between two card-reader polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Upper bound for a single reader poll, in milliseconds.
pub const DEFAULT_READER_TIMEOUT_MS: u64 = 5000;

/// Upper bound for a backend reachability probe, in milliseconds.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Upper bound for an update package download, in milliseconds.
pub const DEFAULT_DOWNLOAD_TIMEOUT_MS: u64 = 300_000;

/// Period between two connectivity probes, in seconds.
pub const DEFAULT_CONNECTIVITY_INTERVAL_SECS: u64 = 30;

/// Period between two update checks, in seconds (one hour).
pub const DEFAULT_UPDATE_CHECK_INTERVAL_SECS: u64 = 3600;

/// Backoff applied after a failed loop iteration, in milliseconds.
pub const LOOP_ERROR_BACKOFF_MS: u64 = 1000;

/// Time granted to supervised loops to wind down at shutdown, in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;

// ============================================================================
// Offline Queue
// ============================================================================

/// Maximum number of access events kept while offline.
///
/// When the bound is exceeded the oldest events are evicted first.
pub const DEFAULT_MAX_OFFLINE_LOGS: usize = 1000;

// ============================================================================
// Updates
// ============================================================================

/// Version reported when no version marker exists yet.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Number of backup archives kept on disk.
pub const BACKUP_RETENTION: usize = 5;

/// Name of the version marker inside the application tree.
pub const VERSION_FILE_NAME: &str = "VERSION";

/// Directory inside an update package holding the new application tree.
pub const PACKAGE_APP_DIR: &str = "app";

/// Hook executed before the live tree is replaced.
pub const PRE_UPDATE_HOOK: &str = "scripts/pre_update.sh";

/// Hook executed after the live tree is replaced.
pub const POST_UPDATE_HOOK: &str = "scripts/post_update.sh";

/// Dependency manifest looked up in the applied tree.
pub const DEFAULT_DEPENDENCY_MANIFEST: &str = "requirements.txt";

// ============================================================================
// Remote Commands
// ============================================================================

/// Delay between two reconnection attempts of the command transport, in seconds.
pub const COMMAND_RECONNECT_INTERVAL_SECS: u64 = 5;

/// Consecutive failed connections after which the command transport gives up.
pub const COMMAND_MAX_RECONNECT_ATTEMPTS: u32 = 5;
