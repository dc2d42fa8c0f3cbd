//! Jobs, the handler seam, and execution outcomes.
//!
//! A [`Job`] is one dispatched unit of work for one session. What the job
//! *does* is behind the [`JobHandler`] trait: the scheduler owns cadence,
//! jitter, retries, and lifecycle, while a handler performs the
//! gateway-mediated reads and sends for its cadence. The built-in handlers
//! live in [`crate::scheduler::handlers`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::registry::SessionKey;
use crate::events::Event;
use crate::gateway::{GatewayError, GeocoderGateway, MessengerGateway, StoreGateway};
use crate::types::{Cadence, Target};

/// One scheduled unit of work queued for execution.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: Uuid,
    pub key: SessionKey,
    pub cadence: Cadence,
    pub target: Option<Target>,
    /// Scheduled fire time, tick time plus jitter.
    pub dispatch_at: Instant,
    /// 1-based attempt count carried from the session's failure streak.
    pub attempt: u32,
}

impl Job {
    pub fn new(
        key: SessionKey,
        target: Option<Target>,
        dispatch_at: Instant,
        attempt: u32,
    ) -> Self {
        let cadence = key.1;
        Self {
            id: Uuid::new_v4(),
            key,
            cadence,
            target,
            dispatch_at,
            attempt,
        }
    }
}

/// Terminal result of one job execution, reported back to the coordinator.
#[derive(Debug)]
pub enum JobOutcome {
    Success,
    /// Transient failure; counts toward the session's retry budget.
    Transient(GatewayError),
    /// Permanent failure; the session is deregistered.
    Permanent(GatewayError),
    /// Rejected before execution by admission control; retried next tick
    /// without consuming retry budget.
    Backpressure,
    /// Failed fast on an open circuit; deferred without consuming retry
    /// budget.
    CircuitOpen { retry_after: std::time::Duration },
    /// Session expired before the job started; no gateway call was made.
    Cancelled,
}

impl JobOutcome {
    /// Map a handler result into its outcome class.
    pub fn from_result(result: Result<(), GatewayError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(GatewayError::CircuitOpen { retry_after, .. }) => Self::CircuitOpen { retry_after },
            Err(err) if err.is_backpressure() => Self::Backpressure,
            Err(err) if err.is_transient() => Self::Transient(err),
            Err(err) => Self::Permanent(err),
        }
    }
}

/// A job paired with its outcome, sent over the result channel.
#[derive(Debug)]
pub struct JobReport {
    pub job: Job,
    pub outcome: JobOutcome,
}

/// Gateway facades and the event channel available to a running job.
///
/// Handlers reach every downstream exclusively through these facades; there
/// is no raw client access here by design of the module boundaries.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<StoreGateway>,
    pub messenger: Arc<MessengerGateway>,
    pub geocoder: Arc<GeocoderGateway>,
    pub events: flume::Sender<Event>,
}

impl JobContext {
    /// Emit an operator event from inside a handler.
    pub fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// One cadence's unit of work.
///
/// Implementations must be idempotent per `(entity, cadence, attempt)`: the
/// scheduler guarantees non-overlap per key but delivers at-least-once across
/// retries.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), GatewayError>;
}
