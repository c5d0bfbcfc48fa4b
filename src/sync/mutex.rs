use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::fork::Fork;
use super::identity::{current_thread_num, ActorIdentity};
use super::philosopher::Philosopher;
use crate::error::{LockError, Violation};
use crate::security::{AllowAll, Capability, SecurityPolicy};

static NEXT_MUTEX: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutexId(u64);

impl MutexId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MUTEX.fetch_add(1, Ordering::Relaxed))
    }
}

/// A plate: one resource that [`MutexLock`](super::MutexLock)s compete to lock.
///
/// Cloning gives another handle to the same plate.
#[derive(Clone)]
pub struct Mutex {
    inner: Arc<Inner>,
}

struct Inner {
    id: MutexId,
    resource: String,
    policy: Arc<dyn SecurityPolicy>,
    plate: parking_lot::Mutex<Plate>,
}

#[derive(Default)]
struct Plate {
    contenders: Vec<Arc<Philosopher>>,
    /// Always one of the contenders.
    owner: Option<Arc<Philosopher>>,
    // Same-thread owners shadowed by a nested lock, innermost last.
    lenders: Vec<Arc<Philosopher>>,
}

/// Who holds a new fork first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Holder {
    Existing { dirty: bool },
    Newcomer { dirty: bool },
}

impl Plate {
    fn position(&self, philosopher: &Philosopher) -> Option<usize> {
        self.contenders
            .iter()
            .position(|c| c.key() == philosopher.key())
    }

    fn is_owner(&self, philosopher: &Philosopher) -> bool {
        self.owner
            .as_ref()
            .map_or(false, |o| o.key() == philosopher.key())
    }

    fn is_lender(&self, philosopher: &Philosopher) -> bool {
        self.lenders.iter().any(|l| l.key() == philosopher.key())
    }
}

impl Mutex {
    pub fn new(resource: impl fmt::Display) -> Self {
        Self::with_policy(resource, Arc::new(AllowAll))
    }

    pub fn with_policy(resource: impl fmt::Display, policy: Arc<dyn SecurityPolicy>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: MutexId::next(),
                resource: resource.to_string(),
                policy,
                plate: parking_lot::Mutex::new(Plate::default()),
            }),
        }
    }

    pub fn id(&self) -> MutexId {
        self.inner.id
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn policy(&self) -> &dyn SecurityPolicy {
        self.inner.policy.as_ref()
    }

    /// May be stale by the time the caller looks at it, unless the caller owns this Mutex.
    pub fn is_locked(&self) -> bool {
        self.inner.plate.lock().owner.is_some()
    }

    pub fn is_locked_by_current_thread(&self) -> bool {
        let plate = self.inner.plate.lock();
        plate
            .owner
            .as_ref()
            .map_or(false, |o| o.runner() == Some(current_thread_num()))
    }

    pub fn owner(&self) -> Option<ActorIdentity> {
        let plate = self.inner.plate.lock();
        plate.owner.as_ref().map(|o| o.identity().clone())
    }

    /// Snapshot of everyone currently competing, in arrival order.
    pub fn contenders(&self) -> Vec<ActorIdentity> {
        let plate = self.inner.plate.lock();
        plate
            .contenders
            .iter()
            .map(|c| c.identity().clone())
            .collect()
    }

    pub(crate) fn is_contender(&self, philosopher: &Philosopher) -> bool {
        self.inner.plate.lock().position(philosopher).is_some()
    }

    pub(crate) fn is_owned_by(&self, philosopher: &Philosopher) -> bool {
        self.inner.plate.lock().is_owner(philosopher)
    }

    pub(crate) fn check(
        &self,
        actor: &ActorIdentity,
        capability: Capability,
    ) -> Result<(), LockError> {
        self.inner.policy.check_permission(actor, capability)?;
        Ok(())
    }

    /// Registers `newcomer` as a contender and creates a fork between it and every other
    /// contender, except same-thread contenders that are already eating here (those feed
    /// the newcomer instead of competing with it).
    ///
    /// Lock order is this Mutex, then one philosopher at a time.
    pub(crate) fn add_contender(&self, newcomer: &Arc<Philosopher>) -> Result<(), LockError> {
        self.check(newcomer.identity(), Capability::Create)?;

        let mut plate = self.inner.plate.lock();
        if plate.position(newcomer).is_some() {
            return Err(Violation::AlreadyCompeting {
                mutex: self.to_string(),
                lock: newcomer.identity().clone(),
            }
            .into());
        }
        let ticket = newcomer.table().ticket;
        let spoonfed = plate
            .owner
            .as_ref()
            .map_or(false, |o| o.runs_beside(newcomer));

        for other in plate.contenders.iter() {
            if (plate.is_owner(other) || plate.is_lender(other)) && other.runs_beside(newcomer)
            {
                continue;
            }
            self.seat(newcomer, ticket, spoonfed, other)?;
        }

        plate.contenders.push(newcomer.clone());
        debug!(
            "{} competes for {} against {} others",
            newcomer.identity(),
            self,
            plate.contenders.len() - 1
        );
        Ok(())
    }

    /// Lays one fork between `newcomer` and `existing`.
    ///
    /// The newcomer learns about the fork before `existing` can act on it, so any dibs
    /// `existing` sends right away lands on a fork the newcomer already needs.
    fn seat(
        &self,
        newcomer: &Arc<Philosopher>,
        ticket: u64,
        spoonfed: bool,
        existing: &Arc<Philosopher>,
    ) -> Result<(), LockError> {
        let fork = Fork::new(self.id(), newcomer, existing, true);
        newcomer
            .table()
            .add_needed_fork(fork.clone(), newcomer.identity())?;

        let holder = {
            let mut table = existing.table();
            let holder = if table.eating {
                Holder::Existing { dirty: true }
            } else if spoonfed {
                Holder::Newcomer { dirty: false }
            } else if table.ticket < ticket {
                Holder::Newcomer { dirty: true }
            } else {
                Holder::Existing { dirty: true }
            };
            table.add_needed_fork(fork.clone(), existing.identity())?;
            match holder {
                Holder::Existing { dirty } => {
                    fork.set_dirty(dirty);
                    table.clean.insert(fork.id());
                }
                Holder::Newcomer { .. } => {
                    table.own_dibs.insert(fork.dibs());
                }
            }
            table.poked = true;
            holder
        };
        existing.notify();

        let mut table = newcomer.table();
        if table.needed.contains_key(&fork.id()) {
            match holder {
                Holder::Newcomer { dirty } => {
                    fork.set_dirty(dirty);
                    table.clean.insert(fork.id());
                }
                Holder::Existing { .. } => {
                    table.own_dibs.insert(fork.dibs());
                }
            }
        }
        trace!(
            "{} laid between {} and {}, held by {:?}",
            fork.id(),
            newcomer.identity(),
            existing.identity(),
            holder
        );
        Ok(())
    }

    /// Makes `philosopher` the owner. Only a same-thread owner may be shadowed.
    pub(crate) fn set_owner(&self, philosopher: &Arc<Philosopher>) -> Result<(), LockError> {
        self.check(philosopher.identity(), Capability::Lock)?;

        let mut plate = self.inner.plate.lock();
        if plate.position(philosopher).is_none() {
            return Err(Violation::NotCompeting {
                mutex: self.to_string(),
                lock: philosopher.identity().clone(),
            }
            .into());
        }
        if let Some(owner) = plate.owner.take() {
            if owner.key() == philosopher.key() || !owner.runs_beside(philosopher)
            {
                let owner_id = owner.identity().clone();
                plate.owner = Some(owner);
                return Err(Violation::AlreadyLocked {
                    mutex: self.to_string(),
                    owner: owner_id,
                }
                .into());
            }
            plate.lenders.push(owner);
        }
        plate.owner = Some(philosopher.clone());
        Ok(())
    }

    /// Gives ownership back to the shadowed same-thread owner, if any.
    pub(crate) fn clear_owner(&self, philosopher: &Philosopher) -> Result<(), Violation> {
        let mut plate = self.inner.plate.lock();
        if !plate.is_owner(philosopher) {
            return Err(Violation::NotOwner {
                mutex: self.to_string(),
                lock: philosopher.identity().clone(),
            });
        }
        plate.owner = plate.lenders.pop();
        Ok(())
    }

    pub(crate) fn remove_contender(&self, philosopher: &Philosopher) -> Result<(), Violation> {
        let mut plate = self.inner.plate.lock();
        let Some(index) = plate.position(philosopher) else {
            return Err(Violation::NotCompeting {
                mutex: self.to_string(),
                lock: philosopher.identity().clone(),
            });
        };
        if plate.is_owner(philosopher) || plate.is_lender(philosopher) {
            return Err(Violation::StillOwner {
                mutex: self.to_string(),
                lock: philosopher.identity().clone(),
            });
        }
        plate.contenders.remove(index);
        Ok(())
    }
}

impl PartialEq for Mutex {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Mutex {}

impl fmt::Display for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mutex_{}", self.inner.resource)
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("id", &self.inner.id)
            .field("resource", &self.inner.resource)
            .finish_non_exhaustive()
    }
}
