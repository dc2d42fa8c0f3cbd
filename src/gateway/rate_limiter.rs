//! Token-bucket admission control for one downstream dependency.
//!
//! Capacity equals the configured per-minute ceiling; tokens refill
//! continuously at `capacity / 60` per second. Waiting is cooperative: a
//! caller sleeps for the computed token deficit instead of polling, and gives
//! up with [`RateLimitExceeded`] once its admission timeout elapses. Callers
//! treat that as backpressure, not a hard failure.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::LimiterConfig;

/// No token became available before the caller's admission timeout.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no rate-limit token available after {waited:?}")]
pub struct RateLimitExceeded {
    pub waited: Duration,
}

/// Smallest sleep a waiter will take between admission re-checks.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket. All executors hitting one dependency go through the
/// same instance.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        let capacity = f64::from(config.max_per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting cooperatively up to `timeout`.
    ///
    /// Multiple waiters race for refilled tokens; the loop re-checks after
    /// each computed sleep so admission stays within the ceiling even under
    /// contention.
    pub async fn acquire(&self, timeout: Duration) -> Result<(), RateLimitExceeded> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().expect("rate limiter poisoned");
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                // Time until one full token accrues. Float rounding can leave
                // the deficit a hair above zero; the floor keeps the sleep
                // from collapsing into a zero-duration spin.
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
                    .max(MIN_WAIT)
            };

            let now = Instant::now();
            if now + wait > deadline {
                return Err(RateLimitExceeded {
                    waited: now.saturating_duration_since(started),
                });
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant used by ad hoc best-effort reads.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().expect("rate limiter poisoned");
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Fraction of the bucket currently consumed, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        let mut bucket = self.bucket.lock().expect("rate limiter poisoned");
        self.refill(&mut bucket);
        1.0 - bucket.tokens / self.capacity
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}
