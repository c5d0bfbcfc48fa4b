use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static NEXT_THREAD_NUM: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_NUM: u64 = NEXT_THREAD_NUM.fetch_add(1, Ordering::Relaxed);
}

/// Random id of this process, generated once. Distinguishes actors of different systems
/// that happen to share thread numbers.
pub fn local_system_id() -> &'static str {
    static SYSTEM_ID: OnceLock<String> = OnceLock::new();
    SYSTEM_ID.get_or_init(|| format!("{:016x}", rand::random::<u64>()))
}

/// Small, stable number of the calling thread. Numbers are never reused within a process.
pub fn current_thread_num() -> u64 {
    THREAD_NUM.with(|n| *n)
}

/// Who is competing for a Mutex: (system, thread, human readable name).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActorIdentity {
    system_id: String,
    thread_num: u64,
    name: String,
}

impl ActorIdentity {
    pub fn new(system_id: impl Into<String>, thread_num: u64, name: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            thread_num,
            name: name.into(),
        }
    }

    /// The calling thread, named after the thread if it has a name.
    pub fn current() -> Self {
        let thread_num = current_thread_num();
        let name = match std::thread::current().name() {
            Some(name) => name.to_owned(),
            None => format!("thread_{thread_num}"),
        };
        Self::new(local_system_id(), thread_num, name)
    }

    /// The calling thread under an explicit name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(local_system_id(), current_thread_num(), name)
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn thread_num(&self) -> u64 {
        self.thread_num
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_same_thread(&self, system_id: &str, thread_num: u64) -> bool {
        self.system_id == system_id && self.thread_num == thread_num
    }

    pub fn is_same_thread_as(&self, other: &ActorIdentity) -> bool {
        self.is_same_thread(&other.system_id, other.thread_num)
    }

    pub fn is_current_thread(&self) -> bool {
        self.is_same_thread(local_system_id(), current_thread_num())
    }
}

impl fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutexLock_{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::identity::{current_thread_num, local_system_id, ActorIdentity};

    #[test]
    fn same_thread() {
        let a = ActorIdentity::named("a");
        let b = ActorIdentity::named("b");
        assert_ne!(a, b);
        assert!(a.is_same_thread_as(&b));
        assert!(a.is_current_thread());
        assert_eq!(a.system_id(), local_system_id());

        let elsewhere = std::thread::spawn(ActorIdentity::current).join().unwrap();
        assert!(!a.is_same_thread_as(&elsewhere));
        assert!(!elsewhere.is_current_thread());
    }

    #[test]
    fn thread_nums_are_stable_and_distinct() {
        let here = current_thread_num();
        assert_eq!(here, current_thread_num());
        let there = std::thread::spawn(current_thread_num).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn other_systems_differ() {
        let local = ActorIdentity::named("x");
        let remote = ActorIdentity::new("elsewhere", local.thread_num(), "x");
        assert!(!local.is_same_thread_as(&remote));
    }

    #[test]
    fn unnamed_threads_get_a_number() {
        let id = std::thread::spawn(ActorIdentity::current).join().unwrap();
        assert_eq!(id.name(), format!("thread_{}", id.thread_num()));
        assert_eq!(id.to_string(), format!("MutexLock_thread_{}", id.thread_num()));
    }
}
