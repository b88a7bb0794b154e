use std::error::Error;
use std::fmt;

use dreadlock_digest::InvalidDigestParams;

use crate::ThreadHandle;

/// The calling thread found its own identity in the chain of threads it was
/// waiting behind.
///
/// The acquisition did not happen. Whatever the caller already holds should be
/// released so the other participants of the cycle can make progress. The
/// digest merges performed while waiting are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockDetected {
    pub lock: &'static str,
    pub thread: ThreadHandle,
}

impl fmt::Display for DeadlockDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deadlock detected: {} would wait on `{}` behind a chain that includes itself",
            self.thread, self.lock
        )
    }
}

impl Error for DeadlockDetected {}

/// `unlock()` was called by a thread that does not own the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotOwner {
    pub lock: &'static str,
    pub caller: ThreadHandle,
    /// `None` if the lock was free.
    pub owner: Option<ThreadHandle>,
}

impl fmt::Display for NotOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            Some(owner) => write!(
                f,
                "{} tried to unlock `{}`, which is held by {owner}",
                self.caller, self.lock
            ),
            None => write!(
                f,
                "{} tried to unlock `{}`, which is not locked",
                self.caller, self.lock
            ),
        }
    }
}

impl Error for NotOwner {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    Deadlock(DeadlockDetected),
    NotOwner(NotOwner),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deadlock(e) => e.fmt(f),
            Self::NotOwner(e) => e.fmt(f),
        }
    }
}

impl Error for LockError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Deadlock(e) => Some(e),
            Self::NotOwner(e) => Some(e),
        }
    }
}

impl From<DeadlockDetected> for LockError {
    fn from(e: DeadlockDetected) -> Self {
        Self::Deadlock(e)
    }
}

impl From<NotOwner> for LockError {
    fn from(e: NotOwner) -> Self {
        Self::NotOwner(e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },
    Digest(InvalidDigestParams),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVar { var, value, reason } => {
                write!(f, "invalid value {value:?} for {var}: {reason}")
            }
            Self::Digest(e) => write!(f, "invalid digest parameters: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Digest(e) => Some(e),
            Self::InvalidVar { .. } => None,
        }
    }
}

impl From<InvalidDigestParams> for ConfigError {
    fn from(e: InvalidDigestParams) -> Self {
        Self::Digest(e)
    }
}
