//! Storage layer for the turnstile daemon.
//!
//! Two small file-backed stores live here:
//!
//! - [`AccessLogger`] - the bounded offline access-event queue, with derived
//!   statistics and date-range export
//! - [`WhitelistStore`] - the local copy of the backend's authorized cards
//!
//! Both persist JSON documents through [`atomic`], which writes a temp file,
//! fsyncs it and renames it over the target. A malformed document found at
//! startup is logged and replaced by an empty state.
//!
//! # Examples
//!
//! ```no_run
//! use turnkey_core::{AccessEvent, CardId, Direction};
//! use turnkey_storage::AccessLogger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let logger = AccessLogger::open("data/offline_logs.json", 1000).await?;
//!
//! let event = AccessEvent::new("turnstile_001", CardId::new("123456789")?, Direction::In, true, true);
//! let outcome = logger.log(event).await?;
//! assert!(outcome.queued);
//! # Ok(())
//! # }
//! ```

pub mod atomic;
pub mod error;
pub mod logger;
pub mod whitelist;

pub use error::{StorageError, StorageResult};
pub use logger::{AccessLogger, AccessStats, LogOutcome};
pub use whitelist::WhitelistStore;
