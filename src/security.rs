//! Permission boundary consulted before contention, locking and unlocking.

use std::fmt;

use thiserror::Error;

use crate::sync::ActorIdentity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Join the contenders of a Mutex.
    Create,
    /// Become the owner of a Mutex.
    Lock,
    /// Give up ownership of a Mutex.
    Unlock,
    /// Leave the contenders of a Mutex.
    Destroy,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Create,
        Capability::Lock,
        Capability::Unlock,
        Capability::Destroy,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Create => "MUTEX_LOCK_CREATE",
            Capability::Lock => "MUTEX_LOCK",
            Capability::Unlock => "MUTEX_UNLOCK",
            Capability::Destroy => "MUTEX_LOCK_DESTROY",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{actor} was denied {capability}: {reason}")]
pub struct PermissionDenied {
    pub actor: ActorIdentity,
    pub capability: Capability,
    pub reason: String,
}

impl PermissionDenied {
    pub fn new(actor: ActorIdentity, capability: Capability, reason: impl Into<String>) -> Self {
        Self {
            actor,
            capability,
            reason: reason.into(),
        }
    }
}

/// Decides whether an actor may exercise a capability on a Mutex.
///
/// Must not block and must not call back into the Mutex it guards.
pub trait SecurityPolicy: Send + Sync {
    fn check_permission(
        &self,
        actor: &ActorIdentity,
        capability: Capability,
    ) -> Result<(), PermissionDenied>;
}

impl<F> SecurityPolicy for F
where
    F: Fn(&ActorIdentity, Capability) -> Result<(), PermissionDenied> + Send + Sync,
{
    fn check_permission(
        &self,
        actor: &ActorIdentity,
        capability: Capability,
    ) -> Result<(), PermissionDenied> {
        self(actor, capability)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl SecurityPolicy for AllowAll {
    fn check_permission(&self, _: &ActorIdentity, _: Capability) -> Result<(), PermissionDenied> {
        Ok(())
    }
}
