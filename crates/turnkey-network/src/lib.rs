//! Network layer of the turnstile daemon.
//!
//! # Components
//!
//! - [`Backend`]: the access-control backend interface, implemented over HTTP
//!   by [`HttpBackend`] and in memory by [`MockBackend`]
//! - [`RemoteCommand`] and [`CommandSource`]: remote operator commands, fed
//!   in-process by [`ChannelCommandSource`] or over TCP by [`TcpCommandSource`]
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use turnkey_network::{Backend, HttpBackend, HttpBackendConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = HttpBackend::new(HttpBackendConfig {
//!     base_url: "https://access.example.com/api".to_string(),
//!     api_key: "secret".to_string(),
//!     device_id: "turnstile_001".to_string(),
//!     timeout: Duration::from_secs(10),
//!     download_timeout: Duration::from_secs(300),
//! })?;
//!
//! if backend.test_connection().await {
//!     let whitelist = backend.get_whitelist().await?;
//!     println!("{} authorized cards", whitelist.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod command;
pub mod error;
pub mod http;
pub mod mock;
pub mod tcp;
pub mod types;

pub use backend::Backend;
pub use command::{
    ChannelCommandSource, CommandEnvelope, CommandReply, CommandSender, CommandSource,
    RemoteCommand,
};
pub use error::{BackendError, BackendResult, CommandError};
pub use http::{HttpBackend, HttpBackendConfig};
pub use mock::{MockBackend, RecordedStatus};
pub use tcp::{TcpCommandConfig, TcpCommandSource};
pub use types::{AccessDecision, ArchiveFormat, UpdateMetadata, UpdateStatus};
