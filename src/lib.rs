//! All-or-nothing locking over arbitrary sets of shared resources.
//!
//! Every lockable resource is a [`Mutex`] (a plate); every actor that wants to lock
//! one or more of them at once is a [`MutexLock`] (a philosopher). Philosophers that
//! compete for the same plate negotiate over forks and dibs with the Chandy-Misra
//! rules, so any mix of overlapping lock sets can be acquired without deadlock.
//!
//! ```no_run
//! use dibs::{Mutex, MutexLock, ActorIdentity};
//! use std::time::Duration;
//!
//! let accounts = Mutex::new("accounts");
//! let ledger = Mutex::new("ledger");
//! let mut lock = MutexLock::new(ActorIdentity::current(), &[&accounts, &ledger]);
//! lock.lock(Duration::from_secs(1))?;
//! // ... both resources are ours ...
//! lock.unlock()?;
//! # Ok::<(), dibs::LockError>(())
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod security;
pub mod sync;

pub use config::LockConfig;
pub use error::{ConfigError, LockError, Violation};
pub use security::{AllowAll, Capability, PermissionDenied, SecurityPolicy};
pub use sync::{ActorIdentity, Interrupter, Mutex, MutexId, MutexLock, MutexLockGuard};

#[cfg(test)]
pub(crate) fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
