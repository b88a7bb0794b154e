//! The deadlock-detecting lock.
//!
//! A [`Dreadlock`] is either free or held by one thread. While held it caches a
//! copy of its owner's digest. A waiter keeps merging that cached digest into
//! its own digest and re-reading the owner's, so chains of waiting threads
//! propagate along the locks they are blocked on. If a waiter ever finds its
//! own identity in the chain it is waiting behind, it is part of a cycle and
//! gets [`DeadlockDetected`] instead of spinning forever.
//!
//! There is no fairness between waiters: whoever observes the lock free and
//! wins the internal race gets it.

use std::marker::PhantomData;

use dreadlock_digest::ProbabilisticSet;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backoff::Backoff;
use crate::snapshot::LockSnapshot;
use crate::{DeadlockDetected, NotOwner, Registry, ThreadHandle};

/// One ownership period of a lock.
#[derive(Clone)]
struct Tenure {
    owner: ThreadHandle,
    /// The owner's digest epoch right after it acquired the lock. Digests read
    /// at an older epoch predate the acquisition and are not cached.
    epoch: u64,
    /// Last known copy of the owner's digest. Never empty.
    digest: ProbabilisticSet,
}

#[derive(Clone)]
enum LockState {
    Free,
    Held(Tenure),
}

pub struct Dreadlock {
    name: &'static str,
    registry: Registry,
    state: Mutex<LockState>,
}

impl Dreadlock {
    pub fn new(name: &'static str, registry: &Registry) -> Self {
        Self {
            name,
            registry: registry.clone(),
            state: Mutex::new(LockState::Free),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn owner(&self) -> Option<ThreadHandle> {
        match &*self.state.lock() {
            LockState::Free => None,
            LockState::Held(tenure) => Some(tenure.owner),
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(*self.state.lock(), LockState::Held(_))
    }

    /// Acquires the lock, polling until it is free.
    ///
    /// Fails with [`DeadlockDetected`] if the calling thread shows up in the
    /// chain of threads it would be waiting behind, including the case of a
    /// thread locking a lock it already holds. Digest merges performed while
    /// waiting are kept after a failure; they let other waiters see the chain.
    pub fn lock(&self) -> Result<(), DeadlockDetected> {
        let me = ThreadHandle::current();
        let mut backoff = Backoff::new(self.registry.config().backoff);

        loop {
            let mut observed = self.state.lock().clone();
            while let LockState::Held(tenure) = observed {
                if tenure.digest.contains(me.digest()) {
                    warn!(
                        lock = self.name,
                        thread = %me,
                        owner = %tenure.owner,
                        polls = backoff.polls(),
                        "deadlock detected"
                    );
                    return Err(DeadlockDetected {
                        lock: self.name,
                        thread: me,
                    });
                }
                self.registry.union_into_own(&tenure.digest);
                trace!(lock = self.name, thread = %me, owner = %tenure.owner, "waiting");
                backoff.snooze();
                observed = self.refresh(&tenure);
            }

            if self.try_claim(me) {
                debug!(lock = self.name, thread = %me, polls = backoff.polls(), "acquired");
                return Ok(());
            }
            trace!(lock = self.name, thread = %me, "lost acquisition race, retrying");
        }
    }

    /// Releases the lock. Only the owner may do this; anyone else gets
    /// [`NotOwner`] and the lock is left as it was.
    pub fn unlock(&self) -> Result<(), NotOwner> {
        let me = ThreadHandle::current();
        let mut state = self.state.lock();
        let owner = match &*state {
            LockState::Free => None,
            LockState::Held(tenure) => Some(tenure.owner),
        };
        if owner != Some(me) {
            drop(state);
            warn!(lock = self.name, thread = %me, owner = ?owner, "unlock by non-owner");
            return Err(NotOwner {
                lock: self.name,
                caller: me,
                owner,
            });
        }
        *state = LockState::Free;
        drop(state);
        debug!(lock = self.name, thread = %me, "released");
        Ok(())
    }

    /// Acquires the lock and returns a guard that releases it when dropped.
    pub fn guard(&self) -> Result<DreadlockGuard<'_>, DeadlockDetected> {
        self.lock()?;
        Ok(DreadlockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn snapshot(&self) -> LockSnapshot {
        match &*self.state.lock() {
            LockState::Free => LockSnapshot {
                name: self.name.to_string(),
                owner: None,
                owner_epoch: None,
                cached_bits_set: 0,
            },
            LockState::Held(tenure) => LockSnapshot {
                name: self.name.to_string(),
                owner: Some(tenure.owner.to_string()),
                owner_epoch: Some(tenure.epoch),
                cached_bits_set: tenure.digest.bits_set(),
            },
        }
    }

    /// Re-reads the owner's digest into the cache and returns the current state.
    ///
    /// The state mutex is never held while the registry is consulted. The
    /// fetched digest is only cached if `seen` is still the current tenure and
    /// the digest is not older than the acquisition.
    fn refresh(&self, seen: &Tenure) -> LockState {
        let fetched = self.registry.snapshot_of_versioned(seen.owner);
        let mut state = self.state.lock();
        if let (LockState::Held(current), Some((digest, epoch))) = (&mut *state, fetched)
            && current.owner == seen.owner
            && current.epoch == seen.epoch
            && epoch >= current.epoch
            && !digest.is_empty()
        {
            current.digest = digest;
        }
        state.clone()
    }

    /// Takes the lock if it is still free. On success the caller's digest is
    /// reset to `{self}`, which is also what gets cached.
    fn try_claim(&self, me: ThreadHandle) -> bool {
        let epoch = self.registry.own_epoch() + 1;
        let digest = ProbabilisticSet::seeded(self.registry.shape(), me.digest());
        {
            let mut state = self.state.lock();
            if let LockState::Held(_) = *state {
                return false;
            }
            *state = LockState::Held(Tenure {
                owner: me,
                epoch,
                digest,
            });
        }
        let reset_epoch = self.registry.reset_own();
        if reset_epoch != epoch {
            // evicted mid-acquisition; the re-created entry's epoch is still ahead
            debug!(lock = self.name, thread = %me, epoch, reset_epoch, "digest epoch moved");
        }
        true
    }
}

impl Drop for Dreadlock {
    fn drop(&mut self) {
        if let LockState::Held(tenure) = self.state.get_mut() {
            warn!(lock = self.name, owner = %tenure.owner, "dropping a held lock");
        }
    }
}

impl std::fmt::Debug for Dreadlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dreadlock")
            .field("name", &self.name)
            .field("owner", &self.owner())
            .finish()
    }
}

/// Holds a [`Dreadlock`] until dropped. Bound to the acquiring thread.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct DreadlockGuard<'a> {
    lock: &'a Dreadlock,
    _not_send: PhantomData<*const ()>,
}

impl DreadlockGuard<'_> {
    pub fn lock(&self) -> &Dreadlock {
        self.lock
    }
}

impl Drop for DreadlockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            warn!(error = %e, "guard could not release its lock");
        }
    }
}
