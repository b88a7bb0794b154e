use std::time::Duration;

use crate::BackoffConfig;

/// Pause between two polls of a held lock: spin, then yield, then sleep with
/// an exponentially growing, capped duration.
pub(crate) struct Backoff {
    config: BackoffConfig,
    polls: u32,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Self { config, polls: 0 }
    }

    pub(crate) fn snooze(&mut self) {
        let spin_end = self.config.spin_polls;
        let yield_end = spin_end.saturating_add(self.config.yield_polls);

        if self.polls < spin_end {
            for _ in 0..(1u32 << self.polls.min(6)) {
                std::hint::spin_loop();
            }
        } else if self.polls < yield_end || self.config.max_sleep_micros == 0 {
            std::thread::yield_now();
        } else {
            let exponent = (self.polls - yield_end).min(20);
            let micros = (1u64 << exponent).min(self.config.max_sleep_micros);
            std::thread::sleep(Duration::from_micros(micros));
        }
        self.polls = self.polls.saturating_add(1);
    }

    pub(crate) fn polls(&self) -> u32 {
        self.polls
    }
}
