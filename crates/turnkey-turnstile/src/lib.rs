//! Turnstile controller: the daemon's orchestration layer.
//!
//! [`TurnstileController`] ties the badge readers, the relay outputs, the
//! offline queue, the whitelist, the backend and the self-updater together.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnkey_core::{DaemonConfig, Direction};
//! use turnkey_hardware::{RelayConfig, RelayController};
//! use turnkey_network::MockBackend;
//! use turnkey_storage::{AccessLogger, WhitelistStore};
//! use turnkey_turnstile::{ControllerConfig, TurnstileController};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DaemonConfig::default();
//! let relay = RelayController::from_config(&RelayConfig::from(&config))?;
//! let logger = AccessLogger::open(&config.access.offline_logs_file, 1000).await?;
//! let whitelist = WhitelistStore::open(&config.access.whitelist_file).await;
//!
//! let controller = TurnstileController::new(
//!     ControllerConfig::from(&config),
//!     Arc::new(MockBackend::new()),
//!     Arc::new(relay),
//!     Arc::new(logger),
//!     Arc::new(whitelist),
//! );
//! controller.initialize().await;
//! let event = controller.process_card("123456789", Direction::In).await?;
//! println!("authorized: {}", event.authorized());
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;

pub use controller::{ControllerConfig, Readers, TurnstileController};
pub use error::{ControllerError, ControllerResult};
