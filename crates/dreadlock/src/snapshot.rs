use dreadlock_digest::DigestShape;
use facet::Facet;

/// Point-in-time view of a registry, for logging and debugging.
#[derive(Facet, Debug, Clone)]
pub struct RegistrySnapshot {
    /// Layout shared by every digest in the registry.
    pub shape: DigestShape,
    /// One entry per thread with a live digest, sorted by thread.
    pub threads: Vec<ThreadDigestSnapshot>,
}

#[derive(Facet, Debug, Clone)]
pub struct ThreadDigestSnapshot {
    pub thread: String,
    /// The value this thread inserts into digests.
    pub identity: u64,
    /// Number of times this thread's digest was reset (i.e. locks acquired).
    pub epoch: u64,
    /// Set bits in the digest. Close to `shape.bits` means the digest is saturated
    /// and false positives become likely.
    pub bits_set: u64,
}

#[derive(Facet, Debug, Clone)]
pub struct LockSnapshot {
    pub name: String,
    /// `None` while the lock is free.
    pub owner: Option<String>,
    pub owner_epoch: Option<u64>,
    /// Set bits in the cached owner digest; `0` while free.
    pub cached_bits_set: u64,
}
