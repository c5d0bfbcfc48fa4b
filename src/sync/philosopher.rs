//! The part of a [`MutexLock`](super::MutexLock) its neighbours can reach.
//!
//! Neighbours only ever append to our inbox piles or dissolve a shared fork, each under
//! our own section. They never hold their own section while doing so.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::fork::{Dibs, Fork, ForkId};
use super::identity::ActorIdentity;
use crate::error::Violation;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Philosopher {
    key: u64,
    identity: ActorIdentity,
    table: Mutex<Table>,
    wake: Condvar,
}

/// Everything a philosopher owns, guarded by its section.
///
/// `needed` is the arena of every fork this philosopher shares with a neighbour; the piles
/// only hold ids into it.
#[derive(Default)]
pub(crate) struct Table {
    /// Priority among contenders; lower tickets arrived first.
    pub ticket: u64,
    pub hungry: bool,
    pub eating: bool,
    /// Something was delivered or filed since the rules last ran.
    pub poked: bool,
    /// `lock()` is registering with its Mutexes and is not hungry yet.
    pub entering: bool,
    pub interrupted: bool,
    /// Thread number of the last `lock()` caller.
    pub runner: Option<u64>,
    pub needed: HashMap<ForkId, Arc<Fork>>,
    /// Forks in hand, ready to eat with.
    pub clean: BTreeSet<ForkId>,
    /// Forks handed over by a neighbour, not yet filed.
    pub dirty: Vec<ForkId>,
    pub received_dibs: Vec<Dibs>,
    pub own_dibs: BTreeSet<Dibs>,
}

impl Philosopher {
    pub(crate) fn new(identity: ActorIdentity) -> Arc<Self> {
        Arc::new(Self {
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            identity,
            table: Mutex::new(Table::default()),
            wake: Condvar::new(),
        })
    }

    pub(crate) fn key(&self) -> u64 {
        self.key
    }

    pub(crate) fn identity(&self) -> &ActorIdentity {
        &self.identity
    }

    pub(crate) fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock()
    }

    pub(crate) fn condvar(&self) -> &Condvar {
        &self.wake
    }

    pub(crate) fn is_eating(&self) -> bool {
        self.table().eating
    }

    pub(crate) fn is_hungry(&self) -> bool {
        self.table().hungry
    }

    /// Both are being locked from the same thread. Never true for a philosopher that was
    /// never locked.
    pub(crate) fn runs_beside(&self, other: &Philosopher) -> bool {
        let mine = self.table().runner;
        mine.is_some() && mine == other.table().runner
    }

    pub(crate) fn runner(&self) -> Option<u64> {
        self.table().runner
    }

    pub(crate) fn notify(&self) {
        self.wake.notify_all();
    }

    /// A neighbour hands over a fork. False if we no longer need it, in which case the
    /// edge is being dissolved and the fork is simply dropped.
    pub(crate) fn take_fork(&self, fork: ForkId) -> bool {
        let mut table = self.table();
        if !table.needed.contains_key(&fork) {
            trace!("{} drops {} after the edge was dissolved", self.identity, fork);
            return false;
        }
        trace!("{} receives {}", self.identity, fork);
        table.dirty.push(fork);
        table.poked = true;
        true
    }

    /// A neighbour asks for a fork.
    pub(crate) fn take_dibs(&self, dibs: Dibs) -> bool {
        let mut table = self.table();
        if !table.needed.contains_key(&dibs.fork()) {
            trace!(
                "{} drops dibs on {} after the edge was dissolved",
                self.identity,
                dibs.fork()
            );
            return false;
        }
        trace!("{} receives dibs on {}", self.identity, dibs.fork());
        table.received_dibs.push(dibs);
        table.poked = true;
        true
    }

    /// The neighbour finished or gave up, so the fork between us disappears.
    pub(crate) fn release_fork(&self, fork: ForkId) -> bool {
        let mut table = self.table();
        match table.remove_needed_fork(fork, &self.identity) {
            Ok(_) => {
                trace!("{} no longer needs {}", self.identity, fork);
                table.poked = true;
                true
            }
            Err(_) => false,
        }
    }
}

impl Table {
    pub(crate) fn add_needed_fork(
        &mut self,
        fork: Arc<Fork>,
        owner: &ActorIdentity,
    ) -> Result<(), Violation> {
        if self.needed.contains_key(&fork.id()) {
            return Err(Violation::ForkAlreadyNeeded {
                fork: fork.id().get(),
                lock: owner.clone(),
            });
        }
        self.needed.insert(fork.id(), fork);
        Ok(())
    }

    /// Forgets a fork along with its dibs, wherever they are piled.
    pub(crate) fn remove_needed_fork(
        &mut self,
        fork: ForkId,
        owner: &ActorIdentity,
    ) -> Result<Arc<Fork>, Violation> {
        let removed = self
            .needed
            .remove(&fork)
            .ok_or_else(|| Violation::ForkNotNeeded {
                fork: fork.get(),
                lock: owner.clone(),
            })?;
        let dibs = removed.dibs();
        self.clean.remove(&fork);
        self.dirty.retain(|f| *f != fork);
        self.own_dibs.remove(&dibs);
        self.received_dibs.retain(|d| *d != dibs);
        Ok(removed)
    }

    pub(crate) fn has_all_forks(&self) -> bool {
        self.clean.len() >= self.needed.len()
    }

    /// Empties every pile, returning the forks that were needed.
    pub(crate) fn drain(&mut self) -> Vec<Arc<Fork>> {
        self.clean.clear();
        self.dirty.clear();
        self.received_dibs.clear();
        self.own_dibs.clear();
        let mut forks: Vec<_> = self.needed.drain().map(|(_, fork)| fork).collect();
        forks.sort_by_key(|fork| fork.id());
        forks
    }

    pub(crate) fn check_ledger(&self, owner: &ActorIdentity) -> Result<(), Violation> {
        let fail = |detail: String| -> Result<(), Violation> {
            Err(Violation::Ledger {
                lock: owner.clone(),
                detail,
            })
        };
        if self.hungry && self.eating {
            return fail("both hungry and eating".into());
        }
        let piled = self
            .clean
            .iter()
            .chain(&self.dirty)
            .copied()
            .chain(self.own_dibs.iter().map(Dibs::fork))
            .chain(self.received_dibs.iter().map(Dibs::fork));
        for fork in piled {
            if !self.needed.contains_key(&fork) {
                return fail(format!("{fork} is piled but not needed"));
            }
        }
        if let Some(fork) = self.dirty.iter().find(|f| self.clean.contains(*f)) {
            return fail(format!("{fork} is both in hand and in the inbox"));
        }
        if let Some(dibs) = self.received_dibs.iter().find(|d| self.own_dibs.contains(*d)) {
            return fail(format!("dibs on {} is both filed and unfiled", dibs.fork()));
        }
        Ok(())
    }
}
