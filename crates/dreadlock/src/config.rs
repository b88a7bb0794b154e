use std::fmt::Display;
use std::str::FromStr;

use dreadlock_digest::DigestParams;
use facet::Facet;

use crate::ConfigError;

pub const FALSE_POSITIVE_PROBABILITY_ENV: &str = "DREADLOCK_FALSE_POSITIVE_PROBABILITY";
pub const PROJECTED_THREADS_ENV: &str = "DREADLOCK_PROJECTED_THREADS";
pub const THREAD_EXIT_ENV: &str = "DREADLOCK_THREAD_EXIT";
pub const MAX_SLEEP_MICROS_ENV: &str = "DREADLOCK_MAX_SLEEP_MICROS";

/// Configuration shared by a [`Registry`](crate::Registry) and every lock bound to it.
#[derive(Facet, Debug, Clone, PartialEq, Default)]
pub struct DreadlockConfig {
    pub digest: DigestParams,
    pub backoff: BackoffConfig,
    pub thread_exit: ThreadExitPolicy,
}

/// Pacing of the wait loop in [`Dreadlock::lock`](crate::Dreadlock::lock).
///
/// Every poll still merges the observed digest before re-checking; this only
/// controls how long a waiter pauses between polls.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Polls that busy-spin before pausing.
    pub spin_polls: u32,
    /// Polls after the spinning phase that yield the time slice.
    pub yield_polls: u32,
    /// Cap for the exponential sleep after the yielding phase. `0` keeps yielding forever.
    pub max_sleep_micros: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            spin_polls: 6,
            yield_polls: 10,
            max_sleep_micros: 1_000,
        }
    }
}

/// What happens to a thread's digest when the thread exits.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ThreadExitPolicy {
    /// Keep the entry for the registry's lifetime.
    #[default]
    Retain,
    /// Evict the entry from a thread-local destructor when the thread terminates.
    Evict,
}

impl FromStr for ThreadExitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "evict" => Ok(Self::Evict),
            other => Err(format!("expected `retain` or `evict`, got `{other}`")),
        }
    }
}

impl DreadlockConfig {
    /// Defaults overlaid with `DREADLOCK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(p) = parse_var(&lookup, FALSE_POSITIVE_PROBABILITY_ENV)? {
            config.digest.false_positive_probability = p;
        }
        if let Some(n) = parse_var(&lookup, PROJECTED_THREADS_ENV)? {
            config.digest.projected_element_count = n;
        }
        if let Some(policy) = parse_var(&lookup, THREAD_EXIT_ENV)? {
            config.thread_exit = policy;
        }
        if let Some(micros) = parse_var(&lookup, MAX_SLEEP_MICROS_ENV)? {
            config.backoff.max_sleep_micros = micros;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.digest.validate()?;
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => Err(ConfigError::InvalidVar {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
