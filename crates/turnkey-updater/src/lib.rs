//! Self-update pipeline of the turnstile daemon.
//!
//! [`AutoUpdater`] polls the backend for packages and installs them with a
//! backup-and-rollback protocol. The session walks the phases of
//! [`UpdatePhase`]; [`PhaseMachine`] rejects out-of-order steps.

pub mod archive;
pub mod backup;
pub mod error;
pub mod hooks;
pub mod phase;
pub mod updater;

pub use error::{UpdateError, UpdateResult};
pub use phase::{PhaseMachine, PhaseTransition, UpdatePhase};
pub use updater::{AutoUpdater, UpdateOutcome, UpdaterConfig, is_newer_version};
