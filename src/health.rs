//! Read-only health snapshot for liveness/readiness reporting.
//!
//! The scheduler assembles a [`HealthSnapshot`] on demand
//! ([`crate::scheduler::Scheduler::health`]); serving it over HTTP is left to
//! the embedding process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::{CacheStats, CircuitStateKind};
use crate::scheduler::registry::SessionCounts;
use crate::types::Dependency;

/// Point-in-time view of scheduler and gateway state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub when: DateTime<Utc>,
    pub sessions: CadenceSessions,
    pub queue: QueueHealth,
    pub dependencies: Vec<DependencyHealth>,
    pub caches: CacheHealth,
    pub counters: SchedulerCounters,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CadenceSessions {
    pub visible: SessionCounts,
    pub silent: SessionCounts,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct QueueHealth {
    pub depth: usize,
    pub capacity: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub dependency: Dependency,
    pub circuit: CircuitStateKind,
    /// Fraction of the token bucket currently consumed, in `[0, 1]`.
    pub limiter_utilization: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CacheHealth {
    pub store: CacheStats,
    pub geocoder: CacheStats,
}

/// Monotonic counters since process start.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SchedulerCounters {
    pub visible_sent: u64,
    pub silent_refreshes: u64,
    pub retries_exhausted: u64,
    pub sessions_deregistered: u64,
    pub backpressure_rejections: u64,
    pub jobs_cancelled: u64,
}

impl HealthSnapshot {
    /// Degraded when any dependency's circuit is not closed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.dependencies
            .iter()
            .any(|d| d.circuit != CircuitStateKind::Closed)
    }
}
