//! Bounded exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How often, and how patiently, to retry something.
///
/// Attempt `n` (1-based) that fails is followed by a wait of
/// `base_delay * multiplier^(n-1)`, capped at `max_delay`. After
/// `max_attempts` failures the caller gives up.
///
/// With `jitter` on, each wait is drawn uniformly from `[delay/2, delay]`
/// so two peers that lost the link at the same moment don't retry in
/// lockstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    /// The reconnection policy: 8 attempts, 250 ms doubling up to 8 s.
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(250),
            multiplier: 2,
            max_delay: Duration::from_secs(8),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy for re-sending one command: 5 attempts, 100 ms doubling up
    /// to 2 s.
    pub fn send() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_secs(2),
            jitter: false,
        }
    }

    /// Policy for re-requesting a snapshot during resync: 5 attempts,
    /// 500 ms doubling up to 4 s.
    pub fn resync() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(4),
            jitter: false,
        }
    }

    /// Clamp out-of-range values so the policy is safe to use.
    ///
    /// - `max_attempts` at least 1.
    /// - `multiplier` at least 1.
    /// - `max_delay` at least `base_delay`.
    pub fn validated(mut self) -> Self {
        if self.max_attempts == 0 {
            tracing::warn!("max_attempts of 0 would never try; using 1");
            self.max_attempts = 1;
        }
        self.multiplier = self.multiplier.max(1);
        self.max_delay = self.max_delay.max(self.base_delay);
        self
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// The wait after the `attempt`-th failure, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// The wait after the `attempt`-th failure, with jitter applied when
    /// enabled.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter {
            return delay;
        }
        let ms = delay.as_millis() as u64;
        if ms < 2 {
            return delay;
        }
        Duration::from_millis(rand::rng().random_range(ms / 2..=ms))
    }
}
