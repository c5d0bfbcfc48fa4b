//! The philosopher side of the dinner.
//!
//! A [`MutexLock`] registers with each of its Mutexes (which lays forks towards every other
//! contender) and then applies the four Chandy-Misra rules until it holds every fork it
//! needs:
//!
//! 1. hungry: send the dibs of every fork not in hand to the neighbour holding it,
//! 2. not eating: hand over every dirty fork in hand that a neighbour has dibs on,
//! 3. file received dibs,
//! 4. clean and file received forks.
//!
//! Holding every needed fork makes it the owner of all of its Mutexes at once. Unlocking
//! (or giving up) dissolves every fork it shares, which is what lets its neighbours move on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::fork::Fork;
use super::identity::{current_thread_num, ActorIdentity};
use super::mutex::Mutex;
use super::philosopher::Philosopher;
use crate::config::LockConfig;
use crate::error::{LockError, Violation};
use crate::security::Capability;

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

pub struct MutexLock {
    philosopher: Arc<Philosopher>,
    mutexes: Vec<Mutex>,
    config: LockConfig,
}

impl MutexLock {
    /// A philosopher for `mutexes`, duplicates ignored. Nothing is registered until
    /// [`lock`](Self::lock).
    pub fn new(identity: ActorIdentity, mutexes: &[&Mutex]) -> Self {
        let mut unique: Vec<Mutex> = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            if !unique.contains(mutex) {
                unique.push((*mutex).clone());
            }
        }
        Self {
            philosopher: Philosopher::new(identity),
            mutexes: unique,
            config: LockConfig::default(),
        }
    }

    pub fn for_current_thread(mutexes: &[&Mutex]) -> Self {
        Self::new(ActorIdentity::current(), mutexes)
    }

    pub fn with_config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    pub fn identity(&self) -> &ActorIdentity {
        self.philosopher.identity()
    }

    pub fn mutexes(&self) -> &[Mutex] {
        &self.mutexes
    }

    pub fn needs(&self, mutex: &Mutex) -> bool {
        self.mutexes.contains(mutex)
    }

    pub fn is_hungry(&self) -> bool {
        self.philosopher.is_hungry()
    }

    pub fn is_eating(&self) -> bool {
        self.philosopher.is_eating()
    }

    /// How many forks this lock currently shares with its neighbours.
    pub fn needed_forks(&self) -> usize {
        self.philosopher.table().needed.len()
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            philosopher: self.philosopher.clone(),
        }
    }

    /// Locks every Mutex of this lock or none of them.
    ///
    /// On timeout or interruption everything is rolled back: this lock is no longer a
    /// contender anywhere and shares no forks, so a fresh attempt starts clean.
    ///
    /// A timeout too large to be expressed as a deadline waits without one.
    /// Nesting under a same-thread owner is decided by the thread calling this, not by
    /// the thread recorded in the identity.
    pub fn lock(&mut self, timeout: Duration) -> Result<(), LockError> {
        if timeout.is_zero() {
            return Err(LockError::InvalidTimeout);
        }
        {
            let table = self.philosopher.table();
            if table.hungry || table.eating {
                return Err(Violation::AlreadyActive {
                    lock: self.identity().clone(),
                    state: if table.eating { "eating" } else { "hungry" },
                }
                .into());
            }
        }
        for mutex in &self.mutexes {
            mutex.check(self.identity(), Capability::Create)?;
            mutex.check(self.identity(), Capability::Lock)?;
        }

        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        {
            let mut table = self.philosopher.table();
            table.ticket = NEXT_TICKET.fetch_add(1, Ordering::Relaxed);
            table.runner = Some(current_thread_num());
            table.entering = true;
            table.interrupted = false;
            table.poked = false;
        }

        for (registered, mutex) in self.mutexes.iter().enumerate() {
            if let Err(e) = mutex.add_contender(&self.philosopher) {
                warn!("{} could not compete for {}: {}", self.identity(), mutex, e);
                {
                    let mut table = self.philosopher.table();
                    table.entering = false;
                    table.interrupted = false;
                }
                self.withdraw(&self.mutexes[..registered]);
                return Err(e);
            }
        }
        {
            let mut table = self.philosopher.table();
            table.entering = false;
            table.hungry = true;
        }
        debug!(
            "{} is hungry for {} forks",
            self.identity(),
            self.needed_forks()
        );

        loop {
            loop {
                let wake_ups = match self.apply_rules() {
                    Ok(wake_ups) => wake_ups,
                    Err(e) => return Err(self.abandon(e)),
                };
                if wake_ups.is_empty() {
                    break;
                }
                for neighbour in wake_ups {
                    neighbour.notify();
                }
            }

            let mut table = self.philosopher.table();
            if table.eating {
                debug!("{} is eating after {:?}", self.identity(), started.elapsed());
                return Ok(());
            }
            if !table.hungry {
                drop(table);
                let e = Violation::Ledger {
                    lock: self.identity().clone(),
                    detail: "stopped being hungry without eating".into(),
                };
                return Err(self.abandon(e.into()));
            }
            if table.interrupted {
                drop(table);
                let e = LockError::InterruptedWait {
                    lock: self.identity().clone(),
                };
                return Err(self.abandon(e));
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                let e = LockError::LockTimeout {
                    lock: self.identity().clone(),
                    waited: started.elapsed(),
                    held: table.clean.len(),
                    needed: table.needed.len(),
                };
                drop(table);
                return Err(self.abandon(e));
            }
            if table.poked {
                continue;
            }
            // deliveries set `poked` under this section, so nothing slips in before we sleep
            match deadline {
                Some(deadline) => {
                    self.philosopher.condvar().wait_until(&mut table, deadline);
                }
                None => self.philosopher.condvar().wait(&mut table),
            }
        }
    }

    /// Releases every Mutex and dissolves every fork. Unlocking an idle lock does nothing.
    ///
    /// Permissions are checked for every Mutex first; a denial leaves the lock untouched.
    pub fn unlock(&mut self) -> Result<(), LockError> {
        {
            let table = self.philosopher.table();
            if !table.hungry && !table.eating {
                return Ok(());
            }
        }
        for mutex in &self.mutexes {
            mutex.check(self.identity(), Capability::Unlock)?;
            mutex.check(self.identity(), Capability::Destroy)?;
        }
        if self.is_eating() {
            // a nested lock of this thread may still be sitting on one of our plates
            if let Some(mutex) = self
                .mutexes
                .iter()
                .find(|m| !m.is_owned_by(&self.philosopher))
            {
                return Err(Violation::NotOwner {
                    mutex: mutex.to_string(),
                    lock: self.identity().clone(),
                }
                .into());
            }
        }

        let was_eating = {
            let mut table = self.philosopher.table();
            let was_eating = table.eating;
            table.hungry = false;
            table.eating = false;
            was_eating
        };
        // forks are dissolved even if a plate disagrees
        let mut failure: Option<Violation> = None;
        for mutex in &self.mutexes {
            if was_eating {
                if let Err(e) = mutex.clear_owner(&self.philosopher) {
                    failure.get_or_insert(e);
                }
            }
            if let Err(e) = mutex.remove_contender(&self.philosopher) {
                failure.get_or_insert(e);
            }
        }
        for neighbour in self.dissolve_forks() {
            neighbour.notify();
        }
        match failure {
            Some(violation) => {
                error!("{} unlocked inconsistently: {}", self.identity(), violation);
                Err(violation.into())
            }
            None => {
                debug!("{} is done", self.identity());
                Ok(())
            }
        }
    }

    /// Locks with a guard that unlocks when dropped.
    pub fn guard(&mut self, timeout: Duration) -> Result<MutexLockGuard<'_>, LockError> {
        self.lock(timeout)?;
        Ok(MutexLockGuard { lock: self })
    }

    /// [`guard`](Self::guard) with the configured default timeout.
    pub fn acquire(&mut self) -> Result<MutexLockGuard<'_>, LockError> {
        let timeout = self.config.default_timeout;
        self.guard(timeout)
    }

    /// One pass of the four rules. Returns the neighbours that were handed a fork or dibs.
    fn apply_rules(&self) -> Result<Vec<Arc<Philosopher>>, LockError> {
        let me = &self.philosopher;
        let mut wake_ups: Vec<Arc<Philosopher>> = Vec::new();

        // R1: ask for every fork not in hand
        let mut requests: Vec<Arc<Fork>> = Vec::new();
        {
            let mut table = me.table();
            table.poked = false;
            if table.hungry {
                let asks: Vec<_> = table
                    .own_dibs
                    .iter()
                    .filter(|dibs| !table.clean.contains(&dibs.fork()))
                    .copied()
                    .collect();
                for dibs in asks {
                    table.own_dibs.remove(&dibs);
                    if let Some(fork) = table.needed.get(&dibs.fork()) {
                        requests.push(fork.clone());
                    }
                }
            }
        }
        for fork in requests {
            if let Some(neighbour) = fork.neighbour_of(me) {
                trace!("{} asks {} for {}", me.identity(), neighbour.identity(), fork.id());
                if neighbour.take_dibs(fork.dibs()) {
                    push_unique(&mut wake_ups, neighbour);
                }
            }
        }

        // R2: yield every requested dirty fork, keeping the dibs to ask for it back
        let gifts: Vec<Arc<Fork>> = {
            let mut table = me.table();
            if table.eating {
                Vec::new()
            } else {
                let gifts: Vec<_> = table
                    .own_dibs
                    .iter()
                    .filter(|dibs| table.clean.contains(&dibs.fork()))
                    .filter_map(|dibs| table.needed.get(&dibs.fork()))
                    .filter(|fork| fork.is_dirty())
                    .cloned()
                    .collect();
                for fork in &gifts {
                    table.clean.remove(&fork.id());
                }
                gifts
            }
        };
        for fork in gifts {
            if let Some(neighbour) = fork.neighbour_of(me) {
                trace!("{} hands {} to {}", me.identity(), fork.id(), neighbour.identity());
                if neighbour.take_fork(fork.id()) {
                    push_unique(&mut wake_ups, neighbour);
                }
            }
        }

        let begin_eating = {
            let mut table = me.table();

            // R3: file dibs
            if !table.received_dibs.is_empty() {
                let received: Vec<_> = table.received_dibs.drain(..).collect();
                table.own_dibs.extend(received);
                table.poked = true;
            }

            // R4: clean and file forks
            if !table.dirty.is_empty() {
                let received: Vec<_> = table.dirty.drain(..).collect();
                for id in received {
                    if let Some(fork) = table.needed.get(&id) {
                        fork.set_dirty(false);
                    }
                    table.clean.insert(id);
                }
                table.poked = true;
            }

            if cfg!(debug_assertions) {
                table.check_ledger(me.identity())?;
            }

            if table.hungry && table.has_all_forks() {
                table.hungry = false;
                table.eating = true;
                true
            } else {
                false
            }
        };

        if begin_eating {
            self.take_plates()?;
        }
        Ok(wake_ups)
    }

    /// Becomes the owner of every Mutex, or of none if any of them refuses.
    fn take_plates(&self) -> Result<(), LockError> {
        for (taken, mutex) in self.mutexes.iter().enumerate() {
            if let Err(e) = mutex.set_owner(&self.philosopher) {
                warn!("{} was refused {}: {}", self.identity(), mutex, e);
                for earlier in &self.mutexes[..taken] {
                    if let Err(e) = earlier.clear_owner(&self.philosopher) {
                        error!("{} could not give back {}: {}", self.identity(), earlier, e);
                    }
                }
                let mut table = self.philosopher.table();
                table.hungry = false;
                table.eating = false;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Rolls an unsuccessful `lock()` all the way back and hands back `cause`.
    fn abandon(&self, cause: LockError) -> LockError {
        {
            let mut table = self.philosopher.table();
            table.hungry = false;
            table.eating = false;
            table.entering = false;
            table.interrupted = false;
        }
        for mutex in &self.mutexes {
            if mutex.is_owned_by(&self.philosopher) {
                if let Err(e) = mutex.clear_owner(&self.philosopher) {
                    error!("{} could not give back {}: {}", self.identity(), mutex, e);
                }
            }
        }
        self.withdraw(&self.mutexes);
        if cause.is_violation() {
            error!("{} gave up: {}", self.identity(), cause);
        } else {
            warn!("{} gave up: {}", self.identity(), cause);
        }
        cause
    }

    /// Leaves the contenders of `mutexes` and dissolves every fork.
    fn withdraw(&self, mutexes: &[Mutex]) {
        for mutex in mutexes {
            if mutex.is_contender(&self.philosopher) {
                if let Err(e) = mutex.remove_contender(&self.philosopher) {
                    error!("{} could not leave {}: {}", self.identity(), mutex, e);
                }
            }
        }
        for neighbour in self.dissolve_forks() {
            neighbour.notify();
        }
    }

    /// Drops every fork from our piles and from our neighbours'. Returns the neighbours
    /// that lost a fork.
    fn dissolve_forks(&self) -> Vec<Arc<Philosopher>> {
        let me = &self.philosopher;
        let forks = me.table().drain();
        let mut touched = Vec::new();
        for fork in forks {
            if let Some(neighbour) = fork.neighbour_of(me) {
                if neighbour.release_fork(fork.id()) {
                    push_unique(&mut touched, neighbour);
                }
            }
        }
        touched
    }
}

impl Drop for MutexLock {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            warn!("{} could not unlock while dropping: {}", self.identity(), e);
        }
    }
}

impl std::fmt::Debug for MutexLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexLock")
            .field("identity", self.identity())
            .field("mutexes", &self.mutexes)
            .finish_non_exhaustive()
    }
}

fn push_unique(neighbours: &mut Vec<Arc<Philosopher>>, neighbour: Arc<Philosopher>) {
    if !neighbours.iter().any(|n| n.key() == neighbour.key()) {
        neighbours.push(neighbour);
    }
}

/// Unlocks its [`MutexLock`] when dropped.
pub struct MutexLockGuard<'a> {
    lock: &'a mut MutexLock,
}

impl<'a> MutexLockGuard<'a> {
    pub fn mutex_lock(&self) -> &MutexLock {
        self.lock
    }

    /// Unlocks now, reporting what dropping would only log.
    pub fn unlock(self) -> Result<(), LockError> {
        let mut this = std::mem::ManuallyDrop::new(self);
        this.lock.unlock()
    }
}

impl<'a> Drop for MutexLockGuard<'a> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            warn!("{} could not unlock its guard: {}", self.lock.identity(), e);
        }
    }
}

/// Wakes a blocked [`MutexLock::lock`] and makes it fail with
/// [`LockError::InterruptedWait`].
#[derive(Clone)]
pub struct Interrupter {
    philosopher: Arc<Philosopher>,
}

impl Interrupter {
    /// Latched from the moment `lock()` starts registering until it returns. Outside an
    /// attempt, or once the lock is eating, this does nothing. A lock that gets every fork
    /// on its first pass eats even if it was interrupted while registering.
    pub fn interrupt(&self) {
        let mut table = self.philosopher.table();
        if table.entering || table.hungry {
            table.interrupted = true;
            drop(table);
            self.philosopher.notify();
        }
    }
}
