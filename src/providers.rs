//! External collaborator seams: the backend data store, the messaging
//! provider, the geocoder, and the eligibility source.
//!
//! Every implementation is called exclusively through a gateway facade (see
//! [`crate::gateway`]); nothing else in the crate touches the network. The
//! traits stay deliberately narrow: keys and payloads are opaque, missing
//! rows are `Ok(None)`, and writes must be idempotent by key so at-least-once
//! delivery is safe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Cadence, EntityId, Target};

/// Failure classes a provider may report. The gateway classifies these into
/// transient (retryable) and permanent outcomes; providers never encode the
/// class in a message string.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Service fault or 5xx-equivalent. Transient.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Backend-reported request quota exhaustion. Transient, and additionally
    /// triggers the gateway's quota cool-off.
    #[error("quota exceeded")]
    QuotaExceeded,

    /// Provider-side throttling (429-equivalent). Transient.
    #[error("throttled by provider")]
    Throttled,

    /// Malformed request. Permanent.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authorization failure. Permanent.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// The entity no longer exists or the provider refuses it outright
    /// (group deleted, bot removed). Permanent; deregisters the session.
    #[error("entity gone: {0}")]
    Gone(String),
}

impl ProviderError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::QuotaExceeded | Self::Throttled
        )
    }

    /// Quota-class errors drive the gateway's exponential cool-off on top of
    /// the token bucket.
    #[must_use]
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::Throttled)
    }
}

/// The spreadsheet-backed asset table, keyed by stable row keys.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Read one row. Unseeded keys are `Ok(None)`, never an error.
    async fn read(&self, key: &str) -> Result<Option<Value>, ProviderError>;

    /// Idempotent upsert of one row by stable key.
    async fn write(&self, key: &str, value: Value) -> Result<(), ProviderError>;
}

/// The chat messaging provider. A send succeeds or fails atomically per
/// target; bulk fan-out is driven by the caller so partial delivery stays
/// per-target.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, target: &Target, payload: &Value) -> Result<(), ProviderError>;
}

/// Read-only reverse geocoding. Unknown coordinates are `Ok(None)`.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, lat: f64, lon: f64)
    -> Result<Option<String>, ProviderError>;
}

/// One entity the scheduler should keep sessions for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntitySpec {
    pub entity_id: EntityId,
    pub cadence: Cadence,
    /// Messaging target for visible-cadence jobs; silent jobs leave it unset.
    pub target: Option<Target>,
}

impl EntitySpec {
    pub fn new(entity_id: impl Into<EntityId>, cadence: Cadence) -> Self {
        Self {
            entity_id: entity_id.into(),
            cadence,
            target: None,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }
}

/// Authoritative source of currently eligible entities.
///
/// Eligibility and deactivation are explicit collaborator signals: an entity
/// absent from [`eligible`](Self::eligible) is deregistered on the next
/// reconciliation, and the scheduler never infers deactivation on its own.
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn eligible(&self) -> Result<Vec<EntitySpec>, ProviderError>;
}
