use std::time::Duration;

use thiserror::Error;

use crate::security::PermissionDenied;
use crate::sync::ActorIdentity;

/// Everything `lock()` and `unlock()` can report to their caller.
#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),

    /// Not every needed fork arrived before the deadline. The attempt has been rolled back.
    #[error("{lock} timed out after {waited:?} holding {held} of {needed} forks")]
    LockTimeout {
        lock: ActorIdentity,
        waited: Duration,
        held: usize,
        needed: usize,
    },

    /// An internal consistency check failed. Indicates a bug in this crate or in its caller.
    #[error("invariant violated: {0}")]
    InvariantViolation(#[from] Violation),

    /// The wait was interrupted through an [`Interrupter`](crate::Interrupter).
    /// Rolled back exactly like a timeout.
    #[error("{lock} was interrupted while waiting for forks")]
    InterruptedWait { lock: ActorIdentity },

    #[error("lock timeout must be greater than zero")]
    InvalidTimeout,
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::LockTimeout { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, LockError::InterruptedWait { .. })
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, LockError::InvariantViolation(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("{mutex} is already locked by {owner}")]
    AlreadyLocked { mutex: String, owner: ActorIdentity },

    #[error("{lock} is not competing for {mutex}")]
    NotCompeting { mutex: String, lock: ActorIdentity },

    #[error("{lock} is already competing for {mutex}")]
    AlreadyCompeting { mutex: String, lock: ActorIdentity },

    #[error("{lock} does not own {mutex}")]
    NotOwner { mutex: String, lock: ActorIdentity },

    #[error("{lock} still owns {mutex}")]
    StillOwner { mutex: String, lock: ActorIdentity },

    #[error("{lock} does not need fork {fork}")]
    ForkNotNeeded { fork: u64, lock: ActorIdentity },

    #[error("{lock} already needs fork {fork}")]
    ForkAlreadyNeeded { fork: u64, lock: ActorIdentity },

    #[error("{lock} is already {state}")]
    AlreadyActive {
        lock: ActorIdentity,
        state: &'static str,
    },

    #[error("{lock} has an inconsistent fork ledger: {detail}")]
    Ledger { lock: ActorIdentity, detail: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a number of milliseconds")]
    Malformed {
        var: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}
