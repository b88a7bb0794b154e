//! A mutual-exclusion lock that detects deadlocks without a wait-for graph.
//!
//! Every thread that uses a [`Registry`] owns a small Bloom-filter digest: the
//! identities of the threads it is currently (transitively) blocked behind,
//! plus its own. A [`Dreadlock`] caches its owner's digest. Waiters merge the
//! cached digest into their own while they poll, so waiting chains spread from
//! lock to lock. When a waiter finds its own identity in the digest of the lock
//! it is waiting on, the wait-for relation has a cycle through it, and
//! [`Dreadlock::lock`] returns [`DeadlockDetected`] instead of hanging.
//!
//! Detection is probabilistic. Digests can report false positives at about the
//! configured rate ([`DigestParams`]); they never miss an identity that was
//! merged in.
//!
//! ```rust,no_run
//! use dreadlock::{Dreadlock, Registry};
//!
//! let registry = Registry::new();
//! let accounts = Dreadlock::new("accounts", &registry);
//! let ledger = Dreadlock::new("ledger", &registry);
//!
//! let _accounts = accounts.guard()?;
//! match ledger.guard() {
//!     Ok(_ledger) => { /* both held */ }
//!     Err(deadlock) => eprintln!("{deadlock}; backing off"),
//! }
//! # Ok::<(), dreadlock::DeadlockDetected>(())
//! ```
//!
//! # Scope
//!
//! Locks only see each other through a shared [`Registry`]. There is no
//! fairness among waiters, no re-entrancy (re-locking a held lock is reported
//! as a deadlock), and no timeouts.
//!
//! # Configuration
//!
//! [`DreadlockConfig`] sets the digest size, the wait-loop pacing and what
//! happens to a digest when its thread exits. [`DreadlockConfig::from_env`]
//! reads the `DREADLOCK_*` variables.

mod backoff;
mod config;
mod error;
mod lock;
mod registry;
mod snapshot;
mod thread;

pub use config::*;
pub use error::*;
pub use lock::{Dreadlock, DreadlockGuard};
pub use registry::{Registry, ThreadDigestGuard};
pub use snapshot::{LockSnapshot, RegistrySnapshot, ThreadDigestSnapshot};
pub use thread::ThreadHandle;

pub use dreadlock_digest::{DigestParams, DigestShape, InvalidDigestParams, ProbabilisticSet};
