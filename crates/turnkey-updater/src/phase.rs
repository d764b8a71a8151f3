//! Update session phase machine.
//!
//! ```text
//! IDLE -> CHECKING -> DOWNLOADING -> VERIFYING -> BACKING_UP -> EXTRACTING
//!      -> APPLYING -> VERSION_COMMIT -> (RESTART_SCHEDULED ->) IDLE
//! ```
//!
//! Any working phase may fail. `FAILED` returns to `IDLE` directly when the
//! application tree was never touched, and through `ROLLING_BACK` otherwise.
//! `CHECKING` also returns straight to `IDLE` when there is nothing to install.
//!
//! # Examples
//!
//! ```
//! use turnkey_updater::{PhaseMachine, UpdatePhase};
//!
//! let mut machine = PhaseMachine::new();
//! machine.transition_to(UpdatePhase::Checking).unwrap();
//! assert!(machine.transition_to(UpdatePhase::Applying).is_err());
//! assert_eq!(machine.current(), UpdatePhase::Checking);
//! ```

use crate::error::{UpdateError, UpdateResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Transitions kept for diagnostics. A full session is at most eleven.
const MAX_HISTORY_SIZE: usize = 100;

/// Phase of the update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    Downloading,
    Verifying,
    BackingUp,
    Extracting,
    Applying,
    VersionCommit,
    RestartScheduled,
    Failed,
    RollingBack,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Idle => "IDLE",
            UpdatePhase::Checking => "CHECKING",
            UpdatePhase::Downloading => "DOWNLOADING",
            UpdatePhase::Verifying => "VERIFYING",
            UpdatePhase::BackingUp => "BACKING_UP",
            UpdatePhase::Extracting => "EXTRACTING",
            UpdatePhase::Applying => "APPLYING",
            UpdatePhase::VersionCommit => "VERSION_COMMIT",
            UpdatePhase::RestartScheduled => "RESTART_SCHEDULED",
            UpdatePhase::Failed => "FAILED",
            UpdatePhase::RollingBack => "ROLLING_BACK",
        };
        f.write_str(name)
    }
}

impl UpdatePhase {
    /// Check if transition to `target` is legal from this phase.
    ///
    /// ```
    /// use turnkey_updater::UpdatePhase;
    ///
    /// assert!(UpdatePhase::Verifying.can_transition_to(&UpdatePhase::BackingUp));
    /// assert!(UpdatePhase::Verifying.can_transition_to(&UpdatePhase::Failed));
    /// assert!(!UpdatePhase::Verifying.can_transition_to(&UpdatePhase::Applying));
    /// ```
    pub fn can_transition_to(&self, target: &UpdatePhase) -> bool {
        use UpdatePhase::*;

        if *target == Failed {
            return self.is_working();
        }
        matches!(
            (self, target),
            (Idle, Checking)
                | (Checking, Downloading | Idle)
                | (Downloading, Verifying)
                | (Verifying, BackingUp)
                | (BackingUp, Extracting)
                | (Extracting, Applying)
                | (Applying, VersionCommit)
                | (VersionCommit, RestartScheduled | Idle)
                | (RestartScheduled, Idle)
                | (Failed, RollingBack | Idle)
                | (RollingBack, Idle)
        )
    }

    /// Phases that can fail.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            UpdatePhase::Checking
                | UpdatePhase::Downloading
                | UpdatePhase::Verifying
                | UpdatePhase::BackingUp
                | UpdatePhase::Extracting
                | UpdatePhase::Applying
                | UpdatePhase::VersionCommit
        )
    }

    /// Whether failing in this phase leaves the live tree modified.
    pub fn modifies_app_tree(&self) -> bool {
        matches!(self, UpdatePhase::Applying | UpdatePhase::VersionCommit)
    }
}

/// One recorded phase change.
#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub from: UpdatePhase,
    pub to: UpdatePhase,
    pub timestamp: Instant,
}

impl PhaseTransition {
    pub fn new(from: UpdatePhase, to: UpdatePhase) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Tracks the phase of the current update session.
///
/// Not synchronized; the updater keeps it behind a mutex.
#[derive(Debug)]
pub struct PhaseMachine {
    current: UpdatePhase,
    entered_at: Instant,
    history: VecDeque<PhaseTransition>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: UpdatePhase::Idle,
            entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current(&self) -> UpdatePhase {
        self.current
    }

    pub fn time_in_current_phase(&self) -> Duration {
        self.entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<PhaseTransition> {
        &self.history
    }

    /// Move to `next`, rejecting transitions the session graph does not allow.
    pub fn transition_to(&mut self, next: UpdatePhase) -> UpdateResult<PhaseTransition> {
        if !self.current.can_transition_to(&next) {
            return Err(UpdateError::InvalidPhaseTransition {
                from: self.current,
                to: next,
            });
        }
        let transition = PhaseTransition::new(self.current, next);
        self.apply(transition.clone());
        Ok(transition)
    }

    /// Force the machine back to `IDLE`.
    pub fn reset(&mut self) -> PhaseTransition {
        let transition = PhaseTransition::new(self.current, UpdatePhase::Idle);
        self.apply(transition.clone());
        transition
    }

    fn apply(&mut self, transition: PhaseTransition) {
        self.current = transition.to;
        self.entered_at = Instant::now();
        self.history.push_back(transition);
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
