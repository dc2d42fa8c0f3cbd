//! Failure-counting guard in front of one downstream dependency.
//!
//! Closed → Open after `threshold` consecutive transient failures; Open fails
//! fast until the cooldown elapses, then HalfOpen admits exactly one trial
//! call. Trial success closes the circuit and resets the count; trial failure
//! re-opens it and re-arms the cooldown.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::BreakerConfig;

/// Call rejected without a network attempt.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("circuit open, retry in {retry_after:?}")]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

/// Observable breaker state, exposed on the health surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

/// State transition reported to the caller so it can emit an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Closed,
    Reopened,
}

#[derive(Debug)]
enum State {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { probing: bool },
}

#[derive(Debug)]
struct Inner {
    state: State,
    failure_count: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            threshold: config.threshold.max(1),
            cooldown: config.cooldown,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
            }),
        }
    }

    /// Admission check before any network attempt.
    ///
    /// Transitions Open → HalfOpen once the cooldown has elapsed and claims
    /// the single trial slot; a second caller during the trial is rejected.
    pub fn preflight(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            State::Closed => Ok(()),
            State::Open { opened_at } => {
                let elapsed = Instant::now().saturating_duration_since(opened_at);
                if elapsed >= self.cooldown {
                    inner.state = State::HalfOpen { probing: true };
                    Ok(())
                } else {
                    Err(CircuitOpen {
                        retry_after: self.cooldown - elapsed,
                    })
                }
            }
            State::HalfOpen { probing: false } => {
                inner.state = State::HalfOpen { probing: true };
                Ok(())
            }
            State::HalfOpen { probing: true } => Err(CircuitOpen {
                retry_after: Duration::ZERO,
            }),
        }
    }

    /// Release a claimed trial slot without recording an outcome.
    ///
    /// Used when admission fails after [`preflight`](Self::preflight) granted
    /// the trial: no network attempt happened, so the slot goes back to the
    /// next caller instead of wedging the breaker in the probing state.
    pub fn abort_trial(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        if matches!(inner.state, State::HalfOpen { probing: true }) {
            inner.state = State::HalfOpen { probing: false };
        }
    }

    /// Record a successful call. Returns the transition, if any, so the
    /// gateway can report a recovered dependency.
    pub fn on_success(&self) -> Option<Transition> {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        let recovered = !matches!(inner.state, State::Closed);
        inner.state = State::Closed;
        inner.failure_count = 0;
        recovered.then_some(Transition::Closed)
    }

    /// Record a transient call failure. Permanent failures (auth, bad
    /// request) must not be fed here.
    pub fn on_failure(&self) -> Option<Transition> {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            State::HalfOpen { .. } => {
                inner.state = State::Open {
                    opened_at: Instant::now(),
                };
                Some(Transition::Reopened)
            }
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.threshold {
                    inner.state = State::Open {
                        opened_at: Instant::now(),
                    };
                    Some(Transition::Opened)
                } else {
                    None
                }
            }
            // Failures racing in after the circuit opened change nothing.
            State::Open { .. } => None,
        }
    }

    pub fn state(&self) -> CircuitStateKind {
        let inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            State::Closed => CircuitStateKind::Closed,
            State::Open { .. } => CircuitStateKind::Open,
            State::HalfOpen { .. } => CircuitStateKind::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("breaker poisoned").failure_count
    }
}
