use std::fmt;
use std::hash::{Hash, Hasher};
use std::thread::ThreadId;

use xxhash_rust::xxh3::Xxh3;

/// Identity of a thread, as seen by the registry and the locks.
///
/// Carries the fixed-width digest value that is inserted into
/// [`ProbabilisticSet`](dreadlock_digest::ProbabilisticSet)s.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle {
    id: ThreadId,
    digest: u64,
}

thread_local! {
    static CURRENT: ThreadHandle = ThreadHandle::from_id(std::thread::current().id());
}

impl ThreadHandle {
    /// Handle of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(|handle| *handle)
    }

    pub fn from_id(id: ThreadId) -> Self {
        let mut hasher = Xxh3::new();
        id.hash(&mut hasher);
        Self {
            id,
            digest: hasher.finish(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Stable hash of this identity.
    pub fn digest(&self) -> u64 {
        self.digest
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{:016x}", self.id, self.digest)
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.id)
    }
}
