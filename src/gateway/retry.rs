//! Exponential backoff schedule shared by session retries and the gateway's
//! quota cool-off.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Capped exponential backoff with multiplicative jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    jitter_factor: f64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: config.backoff_base,
            cap: config.backoff_cap,
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True once `failures` consecutive failures have used up the budget.
    #[must_use]
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }

    /// Delay before retrying after the `attempt`-th failure (1-based):
    /// `min(base * 2^(attempt-1), cap)` plus jitter in
    /// `[0, delay * jitter_factor)` so concurrent retries desynchronize.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let capped = self.base.saturating_mul(1u32 << exp).min(self.cap);
        if self.jitter_factor == 0.0 {
            return capped;
        }
        let jitter = capped.as_secs_f64() * self.jitter_factor * rand::rng().random::<f64>();
        capped + Duration::from_secs_f64(jitter)
    }

    /// Backoff without jitter, used where tests need exact values.
    #[must_use]
    pub fn delay_for_unjittered(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.cap)
    }
}
