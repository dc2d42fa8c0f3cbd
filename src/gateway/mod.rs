//! Rate-limited, cached, circuit-broken access to downstream dependencies.
//!
//! Every outbound call in the crate goes through a [`Gateway`], one per
//! dependency, composing in order: quota cool-off → circuit preflight →
//! token-bucket admission → the network call under a hard timeout →
//! transient/permanent classification feeding the breaker and the quota
//! backoff. Typed facades ([`StoreGateway`], [`MessengerGateway`],
//! [`GeocoderGateway`]) bind the guarded path to the provider traits and add
//! caching where reads allow it.
//!
//! Retries are not looped here: the gateway classifies a single attempt and
//! the scheduler decides rescheduling, so one backoff policy governs each
//! session instead of two stacked loops.

pub mod cache;
pub mod circuit_breaker;
pub mod errors;
pub mod rate_limiter;
pub mod retry;

pub use cache::{CacheStats, ResponseCache, TtlTier};
pub use circuit_breaker::{CircuitBreaker, CircuitOpen, CircuitStateKind, Transition};
pub use errors::GatewayError;
pub use rate_limiter::{RateLimitExceeded, RateLimiter};
pub use retry::RetryPolicy;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{CacheConfig, GatewayConfig};
use crate::events::Event;
use crate::providers::{DataStore, Geocoder, Messenger, ProviderError};
use crate::types::{Dependency, Target};

#[derive(Debug, Default)]
struct QuotaState {
    consecutive: u32,
    hold_until: Option<Instant>,
}

/// The guarded call path for one downstream dependency.
pub struct Gateway {
    dependency: Dependency,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    call_timeout: Duration,
    acquire_timeout: Duration,
    quota_policy: RetryPolicy,
    quota: Mutex<QuotaState>,
    events: flume::Sender<Event>,
}

impl Gateway {
    pub fn new(
        dependency: Dependency,
        config: &GatewayConfig,
        events: flume::Sender<Event>,
    ) -> Self {
        Self {
            dependency,
            limiter: RateLimiter::new(&config.limiter),
            breaker: CircuitBreaker::new(&config.breaker),
            call_timeout: config.call_timeout,
            acquire_timeout: config.limiter.acquire_timeout,
            quota_policy: RetryPolicy::new(&config.retry),
            quota: Mutex::new(QuotaState::default()),
            events,
        }
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    /// Run one guarded attempt of `fut`.
    ///
    /// The future is polled only after the quota cool-off, circuit preflight,
    /// and token admission all pass, and is bounded by the hard call timeout.
    /// Exactly one breaker update happens per attempt.
    pub async fn call<T, Fut>(&self, op: &str, fut: Fut) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.wait_out_quota_hold().await?;

        self.breaker
            .preflight()
            .map_err(|CircuitOpen { retry_after }| GatewayError::CircuitOpen {
                dependency: self.dependency,
                retry_after,
            })?;

        if let Err(RateLimitExceeded { waited }) = self.limiter.acquire(self.acquire_timeout).await
        {
            // No network attempt happened; a trial slot claimed by the
            // preflight must go back so the breaker can still recover.
            self.breaker.abort_trial();
            debug!(dependency = %self.dependency, op, ?waited, "admission timed out");
            return Err(GatewayError::AdmissionTimeout {
                dependency: self.dependency,
                waited,
            });
        }

        match tokio::time::timeout(self.call_timeout, fut).await {
            Err(_) => {
                self.record_transient(op, None);
                Err(GatewayError::CallTimeout {
                    dependency: self.dependency,
                })
            }
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) if err.is_transient() => {
                self.record_transient(op, Some(&err));
                Err(GatewayError::Transient {
                    dependency: self.dependency,
                    source: err,
                })
            }
            Ok(Err(err)) => {
                // Permanent failures surface immediately and do not count as
                // backend degradation.
                debug!(dependency = %self.dependency, op, %err, "permanent failure");
                Err(GatewayError::Permanent {
                    dependency: self.dependency,
                    source: err,
                })
            }
        }
    }

    async fn wait_out_quota_hold(&self) -> Result<(), GatewayError> {
        let wait = {
            let quota = self.quota.lock().expect("quota poisoned");
            quota
                .hold_until
                .map(|until| until.saturating_duration_since(Instant::now()))
                .filter(|w| !w.is_zero())
        };
        if let Some(wait) = wait {
            if wait > self.acquire_timeout {
                return Err(GatewayError::AdmissionTimeout {
                    dependency: self.dependency,
                    waited: Duration::ZERO,
                });
            }
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    fn record_success(&self) {
        {
            let mut quota = self.quota.lock().expect("quota poisoned");
            quota.consecutive = 0;
            quota.hold_until = None;
        }
        if let Some(Transition::Closed) = self.breaker.on_success() {
            self.emit(Event::gateway(self.dependency, "circuit closed"));
        }
    }

    fn record_transient(&self, op: &str, err: Option<&ProviderError>) {
        if let Some(err) = err.filter(|e| e.is_quota()) {
            let delay = {
                let mut quota = self.quota.lock().expect("quota poisoned");
                quota.consecutive += 1;
                let delay = self.quota_policy.delay_for(quota.consecutive);
                quota.hold_until = Some(Instant::now() + delay);
                delay
            };
            self.emit(
                Event::gateway(self.dependency, "quota exceeded, backing off").with_details(
                    json!({"op": op, "delay_ms": delay.as_millis() as u64, "error": err.to_string()}),
                ),
            );
        }

        match self.breaker.on_failure() {
            Some(Transition::Opened) => self.emit(
                Event::gateway(self.dependency, "circuit opened")
                    .with_details(json!({"op": op, "failures": self.breaker.failure_count()})),
            ),
            Some(Transition::Reopened) => self.emit(
                Event::gateway(self.dependency, "trial call failed, circuit reopened")
                    .with_details(json!({"op": op})),
            ),
            _ => {}
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub fn circuit_state(&self) -> CircuitStateKind {
        self.breaker.state()
    }

    pub fn limiter_utilization(&self) -> f64 {
        self.limiter.utilization()
    }
}

/// Gateway facade over the backend data store, with the two-tier read cache.
pub struct StoreGateway {
    gateway: Gateway,
    client: Arc<dyn DataStore>,
    cache: ResponseCache<Option<Value>>,
}

impl StoreGateway {
    pub fn new(
        client: Arc<dyn DataStore>,
        config: &GatewayConfig,
        cache: &CacheConfig,
        events: flume::Sender<Event>,
    ) -> Self {
        Self {
            gateway: Gateway::new(Dependency::Store, config, events),
            client,
            cache: ResponseCache::new(cache),
        }
    }

    /// Uncached guarded read. Missing rows are `Ok(None)`.
    pub async fn read(&self, key: &str) -> Result<Option<Value>, GatewayError> {
        self.gateway.call("read", self.client.read(key)).await
    }

    /// Cached guarded read with singleflight on misses.
    pub async fn read_cached(
        &self,
        key: &str,
        tier: TtlTier,
    ) -> Result<Option<Value>, GatewayError> {
        self.cache
            .get_or_fetch(key, tier, || async {
                self.gateway.call("read", self.client.read(key)).await
            })
            .await
    }

    /// Guarded idempotent upsert. Invalidates the cached row on success.
    pub async fn write(&self, key: &str, value: Value) -> Result<(), GatewayError> {
        self.gateway
            .call("write", self.client.write(key, value))
            .await?;
        self.cache.invalidate(key);
        Ok(())
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }
}

/// Gateway facade over the messaging provider.
pub struct MessengerGateway {
    gateway: Gateway,
    client: Arc<dyn Messenger>,
}

impl MessengerGateway {
    pub fn new(
        client: Arc<dyn Messenger>,
        config: &GatewayConfig,
        events: flume::Sender<Event>,
    ) -> Self {
        Self {
            gateway: Gateway::new(Dependency::Messenger, config, events),
            client,
        }
    }

    /// Guarded send to one target.
    pub async fn send(&self, target: &Target, payload: &Value) -> Result<(), GatewayError> {
        self.gateway
            .call("send", self.client.send(target, payload))
            .await
    }

    /// Sequential fan-out; delivery is reported per target, never as one
    /// aggregate result.
    pub async fn broadcast(
        &self,
        batch: &[(Target, Value)],
    ) -> Vec<(Target, Result<(), GatewayError>)> {
        let mut results = Vec::with_capacity(batch.len());
        for (target, payload) in batch {
            let outcome = self.send(target, payload).await;
            results.push((target.clone(), outcome));
        }
        results
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }
}

/// Gateway facade over the reverse-geocoding provider, long-TTL cached by
/// rounded coordinates.
pub struct GeocoderGateway {
    gateway: Gateway,
    client: Arc<dyn Geocoder>,
    cache: ResponseCache<Option<String>>,
}

impl GeocoderGateway {
    pub fn new(
        client: Arc<dyn Geocoder>,
        config: &GatewayConfig,
        cache: &CacheConfig,
        events: flume::Sender<Event>,
    ) -> Self {
        Self {
            gateway: Gateway::new(Dependency::Geocoder, config, events),
            client,
            cache: ResponseCache::new(cache),
        }
    }

    /// Guarded, cached reverse geocode. Coordinates are rounded to four
    /// decimal places (~11 m) so nearby pings share a cache entry.
    pub async fn reverse_geocode(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<Option<String>, GatewayError> {
        let key = format!("{lat:.4},{lon:.4}");
        self.cache
            .get_or_fetch(&key, TtlTier::Long, || async {
                self.gateway
                    .call("reverse_geocode", self.client.reverse_geocode(lat, lon))
                    .await
            })
            .await
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }
}
