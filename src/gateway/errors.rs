use std::time::Duration;

use thiserror::Error;

use crate::providers::ProviderError;
use crate::types::Dependency;

/// Failure taxonomy for guarded outbound calls.
///
/// The scheduler makes typed decisions off these variants instead of
/// inspecting error strings:
///
/// - [`is_transient`](Self::is_transient) failures count toward a session's
///   retry budget and reschedule with backoff
/// - [`is_backpressure`](Self::is_backpressure) rejections are deferred to
///   the next natural tick without consuming retry budget
/// - [`CircuitOpen`](Self::CircuitOpen) fails fast, also without consuming
///   retry budget
/// - permanent failures deregister the session immediately
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Circuit is open for this dependency; no network attempt was made.
    #[error("circuit open for {dependency}, retry in {retry_after:?}")]
    CircuitOpen {
        dependency: Dependency,
        retry_after: Duration,
    },

    /// No token became available within the admission timeout.
    #[error("rate limiter admission timed out for {dependency} after {waited:?}")]
    AdmissionTimeout {
        dependency: Dependency,
        waited: Duration,
    },

    /// The outbound call exceeded its hard timeout.
    #[error("call to {dependency} timed out")]
    CallTimeout { dependency: Dependency },

    /// The provider reported a transient condition (unavailable, quota).
    #[error("transient failure from {dependency}")]
    Transient {
        dependency: Dependency,
        #[source]
        source: ProviderError,
    },

    /// The provider reported a permanent condition (bad request, auth,
    /// entity gone). Never retried.
    #[error("permanent failure from {dependency}")]
    Permanent {
        dependency: Dependency,
        #[source]
        source: ProviderError,
    },

    /// A singleflight follower observed the leader's fetch fail.
    #[error("shared fetch failed: {message}")]
    SharedFetch { message: String },
}

impl GatewayError {
    /// Eligible for retry with the session's own backoff policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CallTimeout { .. } | Self::Transient { .. } | Self::SharedFetch { .. }
        )
    }

    /// Dispatch-level rejection: re-attempted on the next natural tick.
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::AdmissionTimeout { .. })
    }

    /// Fail-fast on a known-degraded dependency; consumes no retry budget.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    /// True when the underlying provider error signals the entity itself is
    /// gone (deactivated group, removed asset) rather than a service fault.
    #[must_use]
    pub fn is_entity_gone(&self) -> bool {
        matches!(
            self,
            Self::Permanent {
                source: ProviderError::Gone(_),
                ..
            }
        )
    }
}
