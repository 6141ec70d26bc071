//! Exponential backoff shared by the listener (reconnects), the watchdog
//! (forced restarts), startup connection attempts and publish retries.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt` (0-based): `min * 2^attempt`, capped
/// at `max`.
pub fn delay_for(config: BackoffConfig, attempt: u32) -> Duration {
    let cap = config.max.max(config.min);
    let factor = 2u32.saturating_pow(attempt.min(31));
    config.min.saturating_mul(factor).min(cap)
}

/// Stateful backoff counter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    jitter: bool,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            jitter: false,
        }
    }

    /// Randomize every delay into `[delay / 2, delay]` so that several
    /// subscribers losing the store at once do not reconnect in lockstep.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) would
    /// return, before jitter.
    pub fn peek(&self) -> Duration {
        delay_for(self.config, self.attempt)
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let delay = delay_for(self.config, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter { jittered(delay) } else { delay }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn jittered(delay: Duration) -> Duration {
    let half = delay / 2;
    half + rand::rng().random_range(Duration::ZERO..=half)
}
