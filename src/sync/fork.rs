use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::mutex::MutexId;
use super::philosopher::Philosopher;

static NEXT_FORK: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForkId(u64);

impl ForkId {
    fn next() -> Self {
        Self(NEXT_FORK.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fork#{}", self.0)
    }
}

/// The right to ask for a fork next. Identified entirely by its fork, so it can only be
/// moved between piles, never forged for a different fork.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dibs(ForkId);

impl Dibs {
    pub fn fork(&self) -> ForkId {
        self.0
    }
}

/// The contested right to one Mutex between exactly two philosophers.
///
/// Which side holds the fork is recorded in the two philosophers' piles, never here.
/// The neighbours are weak so a fork never keeps a finished philosopher alive.
pub struct Fork {
    id: ForkId,
    mutex: MutexId,
    left: (u64, Weak<Philosopher>),
    right: (u64, Weak<Philosopher>),
    // Chandy-Misra dirty: not yet granted to its holder, so it must be yielded on request.
    dirty: AtomicBool,
}

impl Fork {
    pub(crate) fn new(
        mutex: MutexId,
        left: &Arc<Philosopher>,
        right: &Arc<Philosopher>,
        dirty: bool,
    ) -> Arc<Self> {
        assert_ne!(
            left.key(),
            right.key(),
            "a fork needs two different philosophers"
        );
        Arc::new(Self {
            id: ForkId::next(),
            mutex,
            left: (left.key(), Arc::downgrade(left)),
            right: (right.key(), Arc::downgrade(right)),
            dirty: AtomicBool::new(dirty),
        })
    }

    pub fn id(&self) -> ForkId {
        self.id
    }

    pub fn mutex(&self) -> MutexId {
        self.mutex
    }

    pub fn dibs(&self) -> Dibs {
        Dibs(self.id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release)
    }

    /// The other end of this fork, if it is still alive.
    pub(crate) fn neighbour_of(&self, philosopher: &Philosopher) -> Option<Arc<Philosopher>> {
        let key = philosopher.key();
        if self.left.0 == key {
            self.right.1.upgrade()
        } else if self.right.0 == key {
            self.left.1.upgrade()
        } else {
            None
        }
    }
}

impl fmt::Debug for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_dirty() { "dirty" } else { "clean" };
        write!(
            f,
            "Fork {} {:?} {}<->{} {}",
            self.id.0, self.mutex, self.left.0, self.right.0, state
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::fork::Fork;
    use crate::sync::identity::ActorIdentity;
    use crate::sync::mutex::MutexId;
    use crate::sync::philosopher::Philosopher;

    #[test]
    fn neighbours() {
        let a = Philosopher::new(ActorIdentity::named("a"));
        let b = Philosopher::new(ActorIdentity::named("b"));
        let c = Philosopher::new(ActorIdentity::named("c"));
        let fork = Fork::new(MutexId::next(), &a, &b, true);

        assert_eq!(fork.neighbour_of(&a).unwrap().key(), b.key());
        assert_eq!(fork.neighbour_of(&b).unwrap().key(), a.key());
        assert!(fork.neighbour_of(&c).is_none());
        assert_eq!(fork.dibs().fork(), fork.id());
    }

    #[test]
    fn ids_are_unique() {
        let a = Philosopher::new(ActorIdentity::named("a"));
        let b = Philosopher::new(ActorIdentity::named("b"));
        let mutex = MutexId::next();
        let f1 = Fork::new(mutex, &a, &b, false);
        let f2 = Fork::new(mutex, &a, &b, false);
        assert_ne!(f1.id(), f2.id());
        assert_ne!(f1.dibs(), f2.dibs());
    }

    #[test]
    fn dead_neighbour_is_gone() {
        let a = Philosopher::new(ActorIdentity::named("a"));
        let b = Philosopher::new(ActorIdentity::named("b"));
        let fork = Fork::new(MutexId::next(), &a, &b, true);
        drop(b);
        assert!(fork.neighbour_of(&a).is_none());
    }

    #[test]
    fn cleaning() {
        let a = Philosopher::new(ActorIdentity::named("a"));
        let b = Philosopher::new(ActorIdentity::named("b"));
        let fork = Fork::new(MutexId::next(), &a, &b, true);
        assert!(fork.is_dirty());
        fork.set_dirty(false);
        assert!(!fork.is_dirty());
        assert!(format!("{fork:?}").ends_with("clean"));
    }

    #[test]
    #[should_panic]
    fn no_fork_with_oneself() {
        let a = Philosopher::new(ActorIdentity::named("a"));
        Fork::new(MutexId::next(), &a, &a, true);
    }
}
