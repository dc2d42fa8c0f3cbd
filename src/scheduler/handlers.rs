//! Built-in handlers for the two cadences.
//!
//! Both handlers treat rows as opaque JSON apart from the `lat`/`lon` fields
//! used for geocoding. Message *content* is a non-goal here: the visible
//! handler delegates rendering to a caller-supplied function and sends
//! whatever it returns.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::job::{Job, JobContext, JobHandler};
use crate::gateway::{GatewayError, TtlTier};

/// Renders a location row (plus an optional reverse-geocoded address) into
/// the payload handed to the messaging provider.
pub type RenderFn = dyn Fn(&Value, Option<&str>) -> Value + Send + Sync;

/// Visible cadence: read the entity's latest position through the store
/// gateway, reverse-geocode it, render, and send to the session's target.
pub struct VisibleUpdateHandler {
    source_prefix: String,
    render: Arc<RenderFn>,
}

impl VisibleUpdateHandler {
    pub fn new(render: Arc<RenderFn>) -> Self {
        Self {
            source_prefix: "fleet".to_string(),
            render,
        }
    }

    /// Rendering that passes the row through with the address attached.
    /// Suitable default when the caller formats downstream.
    pub fn passthrough() -> Self {
        Self::new(Arc::new(|row: &Value, address: Option<&str>| {
            let mut payload = match row {
                Value::Object(map) => map.clone(),
                other => {
                    let mut map = Map::new();
                    map.insert("row".to_string(), other.clone());
                    map
                }
            };
            if let Some(address) = address {
                payload.insert("address".to_string(), json!(address));
            }
            Value::Object(payload)
        }))
    }

    #[must_use]
    pub fn with_source_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_prefix = prefix.into();
        self
    }
}

#[async_trait]
impl JobHandler for VisibleUpdateHandler {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), GatewayError> {
        let Some(target) = &job.target else {
            debug!(entity = %job.key.0, "visible session has no target, skipping");
            return Ok(());
        };

        let key = format!("{}/{}", self.source_prefix, job.key.0);
        let Some(row) = ctx.store.read_cached(&key, TtlTier::Short).await? else {
            // Unseeded entity: nothing to send this round.
            debug!(entity = %job.key.0, "no position row, skipping send");
            return Ok(());
        };

        let address = match coordinates(&row) {
            Some((lat, lon)) => match ctx.geocoder.reverse_geocode(lat, lon).await {
                Ok(address) => address,
                // A missing address never blocks the update itself.
                Err(err) => {
                    debug!(entity = %job.key.0, %err, "geocode failed, sending without address");
                    None
                }
            },
            None => None,
        };

        let payload = (self.render)(&row, address.as_deref());
        ctx.messenger.send(target, &payload).await
    }
}

/// Silent cadence: refresh the shared tracker row for the entity from the
/// latest position and warm the geocode cache, with no user-facing send.
pub struct SilentRefreshHandler {
    source_prefix: String,
    dest_prefix: String,
}

impl Default for SilentRefreshHandler {
    fn default() -> Self {
        Self {
            source_prefix: "fleet".to_string(),
            dest_prefix: "tracker".to_string(),
        }
    }
}

impl SilentRefreshHandler {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prefixes(
        mut self,
        source_prefix: impl Into<String>,
        dest_prefix: impl Into<String>,
    ) -> Self {
        self.source_prefix = source_prefix.into();
        self.dest_prefix = dest_prefix.into();
        self
    }
}

#[async_trait]
impl JobHandler for SilentRefreshHandler {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), GatewayError> {
        let source = format!("{}/{}", self.source_prefix, job.key.0);
        let Some(row) = ctx.store.read_cached(&source, TtlTier::Short).await? else {
            debug!(entity = %job.key.0, "no position row, nothing to refresh");
            return Ok(());
        };

        let dest = format!("{}/{}", self.dest_prefix, job.key.0);
        ctx.store.write(&dest, row.clone()).await?;

        // Warm the geocode cache so the next visible update is a cache hit.
        if let Some((lat, lon)) = coordinates(&row) {
            if let Err(err) = ctx.geocoder.reverse_geocode(lat, lon).await {
                debug!(entity = %job.key.0, %err, "geocode warm failed");
            }
        }
        Ok(())
    }
}

fn coordinates(row: &Value) -> Option<(f64, f64)> {
    let lat = row.get("lat").and_then(Value::as_f64)?;
    let lon = row.get("lon").and_then(Value::as_f64)?;
    Some((lat, lon))
}
