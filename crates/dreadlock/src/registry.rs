//! Per-thread digests.
//!
//! Every thread that touches a [`Registry`] gets one [`ProbabilisticSet`]: the
//! identities of the threads it is (transitively) blocked behind, plus its own.
//! Entries live in a sharded map; each entry has its own mutex, and a map shard
//! guard is always released before an entry mutex is taken. No operation holds
//! two entry mutexes at once, so the registry cannot deadlock on itself.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dreadlock_digest::{DigestShape, ProbabilisticSet};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::snapshot::{RegistrySnapshot, ThreadDigestSnapshot};
use crate::{DreadlockConfig, ThreadExitPolicy, ThreadHandle};

struct DigestEntry {
    digest: ProbabilisticSet,
    /// Bumped once per reset, only by the owning thread.
    epoch: u64,
}

impl DigestEntry {
    fn seeded(shape: DigestShape, thread: ThreadHandle, epoch: u64) -> Self {
        Self {
            digest: ProbabilisticSet::seeded(shape, thread.digest()),
            epoch,
        }
    }

    fn ensure_seeded(&mut self, thread: ThreadHandle) {
        if self.digest.is_empty() {
            self.digest.insert(thread.digest());
        }
    }
}

type EntryCell = Arc<Mutex<DigestEntry>>;

struct RegistryInner {
    config: DreadlockConfig,
    shape: DigestShape,
    digests: DashMap<ThreadHandle, EntryCell>,
    /// Highest epoch of any evicted entry. New entries start here, so a
    /// re-created entry never goes back to an epoch a lock tenure has seen.
    retired_epoch: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, thread: ThreadHandle) -> bool {
        let Some((_, entry)) = self.digests.remove(&thread) else {
            return false;
        };
        let epoch = entry.lock().epoch;
        self.retired_epoch.fetch_max(epoch, Ordering::AcqRel);
        true
    }
}

/// Shared store of thread digests for one protection domain.
///
/// Cloning gives another handle to the same registry. Locks can only detect
/// cycles among each other if they were created from the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(DreadlockConfig::default())
    }

    pub fn with_config(config: DreadlockConfig) -> Self {
        let shape = config.digest.shape();
        debug!(
            bits = shape.bits,
            hashes = shape.hashes,
            thread_exit = ?config.thread_exit,
            "creating digest registry"
        );
        Self {
            inner: Arc::new(RegistryInner {
                config,
                shape,
                digests: DashMap::new(),
                retired_epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DreadlockConfig {
        &self.inner.config
    }

    pub fn shape(&self) -> DigestShape {
        self.inner.shape
    }

    /// Whether both handles point at the same registry.
    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of threads with a live digest.
    pub fn len(&self) -> usize {
        self.inner.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.digests.is_empty()
    }

    /// Copy of the caller's digest, creating and seeding it on first use.
    pub fn snapshot_own(&self) -> ProbabilisticSet {
        let me = ThreadHandle::current();
        let entry = self.own_entry(me);
        let mut entry = entry.lock();
        entry.ensure_seeded(me);
        entry.digest.clone()
    }

    /// Merges `other` into the caller's digest.
    pub fn union_into_own(&self, other: &ProbabilisticSet) {
        let me = ThreadHandle::current();
        let entry = self.own_entry(me);
        let mut entry = entry.lock();
        entry.ensure_seeded(me);
        entry.digest.union_in_place(other);
    }

    /// Copy of `thread`'s digest, or an empty set if the thread never touched
    /// this registry. Never creates an entry.
    pub fn snapshot_of(&self, thread: ThreadHandle) -> ProbabilisticSet {
        self.snapshot_of_versioned(thread)
            .map(|(digest, _)| digest)
            .unwrap_or_else(|| ProbabilisticSet::new(self.inner.shape))
    }

    /// Like [`Registry::snapshot_of`], along with the epoch the digest was read at.
    pub(crate) fn snapshot_of_versioned(
        &self,
        thread: ThreadHandle,
    ) -> Option<(ProbabilisticSet, u64)> {
        let entry = self
            .inner
            .digests
            .get(&thread)
            .map(|e| Arc::clone(e.value()))?;
        let entry = entry.lock();
        Some((entry.digest.clone(), entry.epoch))
    }

    /// Resets the caller's digest to exactly `{self}`. Returns the new epoch.
    pub fn reset_own(&self) -> u64 {
        let me = ThreadHandle::current();
        let entry = self.own_entry(me);
        let mut entry = entry.lock();
        entry.digest = ProbabilisticSet::seeded(self.inner.shape, me.digest());
        entry.epoch += 1;
        trace!(thread = %me, epoch = entry.epoch, "digest reset");
        entry.epoch
    }

    /// Current epoch of the caller's digest. Starts at 0 and goes up by one
    /// per reset; an entry re-created after eviction continues from at least
    /// where the evicted one stopped.
    pub fn own_epoch(&self) -> u64 {
        let entry = self.own_entry(ThreadHandle::current());
        entry.lock().epoch
    }

    /// Removes the caller's digest. Returns whether there was one.
    pub fn evict_own(&self) -> bool {
        self.evict(ThreadHandle::current())
    }

    /// Removes `thread`'s digest.
    ///
    /// Meant for threads that are gone. Evicting a live thread only loses what
    /// it has propagated so far; its next access re-seeds it, with an epoch no
    /// lower than the evicted one, so locks it still holds keep refreshing.
    pub fn evict(&self, thread: ThreadHandle) -> bool {
        let removed = self.inner.remove(thread);
        if removed {
            debug!(thread = %thread, "evicted thread digest");
        }
        removed
    }

    /// Seeds the caller's digest and returns a guard that evicts it on drop.
    pub fn register_thread(&self) -> ThreadDigestGuard {
        let thread = ThreadHandle::current();
        drop(self.own_entry(thread));
        ThreadDigestGuard {
            registry: self.clone(),
            thread,
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries: Vec<(ThreadHandle, EntryCell)> = self
            .inner
            .digests
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        let mut threads: Vec<ThreadDigestSnapshot> = entries
            .into_iter()
            .map(|(thread, entry)| {
                let entry = entry.lock();
                ThreadDigestSnapshot {
                    thread: thread.to_string(),
                    identity: thread.digest(),
                    epoch: entry.epoch,
                    bits_set: entry.digest.bits_set(),
                }
            })
            .collect();
        threads.sort_by(|a, b| a.thread.cmp(&b.thread));
        RegistrySnapshot {
            shape: self.inner.shape,
            threads,
        }
    }

    fn own_entry(&self, me: ThreadHandle) -> EntryCell {
        if let Some(entry) = self.inner.digests.get(&me) {
            return Arc::clone(entry.value());
        }
        let shape = self.inner.shape;
        let epoch = self.inner.retired_epoch.load(Ordering::Acquire);
        let entry = Arc::clone(
            self.inner
                .digests
                .entry(me)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(DigestEntry::seeded(shape, me, epoch)))
                })
                .value(),
        );
        trace!(thread = %me, "created thread digest");
        if self.inner.config.thread_exit == ThreadExitPolicy::Evict {
            exit_hook::watch(me, &self.inner);
        }
        entry
    }
}

/// Evicts its thread's digest from the registry when dropped.
pub struct ThreadDigestGuard {
    registry: Registry,
    thread: ThreadHandle,
}

impl ThreadDigestGuard {
    pub fn thread(&self) -> ThreadHandle {
        self.thread
    }
}

impl Drop for ThreadDigestGuard {
    fn drop(&mut self) {
        self.registry.evict(self.thread);
    }
}

mod exit_hook {
    use super::*;

    struct ExitHook {
        thread: ThreadHandle,
        registries: RefCell<Vec<Weak<RegistryInner>>>,
    }

    impl Drop for ExitHook {
        fn drop(&mut self) {
            for registry in self.registries.get_mut().drain(..) {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(self.thread);
                }
            }
        }
    }

    thread_local! {
        static EXIT_HOOK: ExitHook = ExitHook {
            thread: ThreadHandle::current(),
            registries: RefCell::new(Vec::new()),
        };
    }

    /// Arranges for `thread`'s entry in `registry` to be removed when the
    /// calling thread exits.
    pub(super) fn watch(thread: ThreadHandle, registry: &Arc<RegistryInner>) {
        // Already tearing down: the entry outlives the thread.
        let _ = EXIT_HOOK.try_with(|hook| {
            debug_assert_eq!(hook.thread, thread);
            let mut registries = hook.registries.borrow_mut();
            registries.retain(|r| r.strong_count() > 0);
            if !registries
                .iter()
                .any(|r| std::ptr::eq(r.as_ptr(), Arc::as_ptr(registry)))
            {
                registries.push(Arc::downgrade(registry));
            }
        });
    }
}
