pub mod fork;
pub mod identity;
pub mod mutex;
pub mod mutex_lock;
pub(crate) mod philosopher;

pub use identity::ActorIdentity;
pub use mutex::{Mutex, MutexId};
pub use mutex_lock::{Interrupter, MutexLock, MutexLockGuard};

// A MutexLock over a set of Mutexes guarantees
// 1. Mutual Exclusion - at most one MutexLock owns a Mutex, unless it lends it to a nested
// MutexLock of the same thread.
// 2. Atomicity - a MutexLock owns all of its Mutexes or none of them.
// 3. No Deadlock - forks between two MutexLocks never point in a cycle, so some hungry
// MutexLock always holds every fork it needs.
// 4. No Leaks - an unlocked, timed out or interrupted MutexLock competes for nothing and
// shares no forks.
