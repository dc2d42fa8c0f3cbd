mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use common::{MockMessenger, MockStore};
use fleetcast::config::{
    BreakerConfig, CacheConfig, GatewayConfig, LimiterConfig, RetryConfig,
};
use fleetcast::events::Event;
use fleetcast::gateway::{
    CircuitStateKind, Gateway, GatewayError, MessengerGateway, StoreGateway, TtlTier,
};
use fleetcast::providers::ProviderError;
use fleetcast::types::{Dependency, Target};

fn config() -> GatewayConfig {
    GatewayConfig {
        limiter: LimiterConfig {
            max_per_minute: 600,
            acquire_timeout: Duration::from_secs(10),
        },
        breaker: BreakerConfig {
            threshold: 3,
            cooldown: Duration::from_secs(300),
        },
        retry: RetryConfig {
            max_attempts: 3,
            backoff_base: Duration::from_secs(4),
            backoff_cap: Duration::from_secs(60),
            jitter_factor: 0.0,
        },
        call_timeout: Duration::from_secs(5),
    }
}

fn gateway() -> (Gateway, flume::Receiver<Event>) {
    let (tx, rx) = flume::unbounded();
    (Gateway::new(Dependency::Store, &config(), tx), rx)
}

fn drain(rx: &flume::Receiver<Event>) -> Vec<Event> {
    rx.try_iter().collect()
}

#[tokio::test(start_paused = true)]
async fn success_passes_the_value_through() {
    let (gateway, _rx) = gateway();
    let value = gateway
        .call("read", async { Ok::<_, ProviderError>(7u32) })
        .await
        .expect("guarded call");
    assert_eq!(value, 7);
}

#[tokio::test(start_paused = true)]
async fn provider_errors_classify_by_variant() {
    let (gateway, _rx) = gateway();

    let err = gateway
        .call("read", async {
            Err::<(), _>(ProviderError::Unavailable("503".into()))
        })
        .await
        .expect_err("transient");
    assert!(matches!(err, GatewayError::Transient { .. }));
    assert!(err.is_transient());

    let err = gateway
        .call("read", async {
            Err::<(), _>(ProviderError::BadRequest("malformed".into()))
        })
        .await
        .expect_err("permanent");
    assert!(matches!(err, GatewayError::Permanent { .. }));
    assert!(err.is_permanent());

    let err = gateway
        .call("send", async {
            Err::<(), _>(ProviderError::Gone("group deleted".into()))
        })
        .await
        .expect_err("gone");
    assert!(err.is_entity_gone());
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_never_trip_the_breaker() {
    let (gateway, _rx) = gateway();
    for _ in 0..10 {
        let _ = gateway
            .call("read", async {
                Err::<(), _>(ProviderError::Auth("revoked".into()))
            })
            .await;
    }
    assert_eq!(gateway.circuit_state(), CircuitStateKind::Closed);
}

#[tokio::test(start_paused = true)]
async fn slow_call_times_out_as_transient() {
    let (gateway, _rx) = gateway();
    let err = gateway
        .call("read", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, ProviderError>(())
        })
        .await
        .expect_err("timed out");
    assert!(matches!(err, GatewayError::CallTimeout { .. }));
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_after_threshold_and_skips_the_call() {
    let (gateway, rx) = gateway();
    for _ in 0..3 {
        let _ = gateway
            .call("read", async {
                Err::<(), _>(ProviderError::Unavailable("outage".into()))
            })
            .await;
    }
    assert_eq!(gateway.circuit_state(), CircuitStateKind::Open);
    assert!(
        drain(&rx)
            .iter()
            .any(|e| e.message().contains("circuit opened"))
    );

    let polled = Arc::new(AtomicUsize::new(0));
    let probe = {
        let polled = Arc::clone(&polled);
        async move {
            polled.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>(())
        }
    };
    let err = gateway.call("read", probe).await.expect_err("fails fast");
    assert!(err.is_circuit_open());
    assert_eq!(polled.load(Ordering::SeqCst), 0, "no network attempt");
}

#[tokio::test(start_paused = true)]
async fn trial_success_after_cooldown_closes_the_circuit() {
    let (gateway, rx) = gateway();
    for _ in 0..3 {
        let _ = gateway
            .call("read", async {
                Err::<(), _>(ProviderError::Unavailable("outage".into()))
            })
            .await;
    }

    tokio::time::advance(Duration::from_secs(300)).await;
    drain(&rx);

    gateway
        .call("read", async { Ok::<_, ProviderError>(()) })
        .await
        .expect("trial call");
    assert_eq!(gateway.circuit_state(), CircuitStateKind::Closed);
    assert!(
        drain(&rx)
            .iter()
            .any(|e| e.message().contains("circuit closed"))
    );
}

#[tokio::test(start_paused = true)]
async fn admission_timeout_during_trial_releases_the_probe_slot() {
    // One token a minute and an opening threshold of one.
    let mut config = config();
    config.limiter.max_per_minute = 1;
    config.breaker.threshold = 1;
    config.breaker.cooldown = Duration::from_secs(10);
    let (tx, _rx) = flume::unbounded();
    let gateway = Gateway::new(Dependency::Store, &config, tx);

    // The failing call consumes the only token and opens the circuit.
    let _ = gateway
        .call("read", async {
            Err::<(), _>(ProviderError::Unavailable("outage".into()))
        })
        .await;
    assert_eq!(gateway.circuit_state(), CircuitStateKind::Open);

    // The cooldown elapses before the bucket refills, so the trial
    // claimant is turned away at admission without a network attempt.
    tokio::time::advance(Duration::from_secs(10)).await;
    let err = gateway
        .call("read", async { Ok::<_, ProviderError>(()) })
        .await
        .expect_err("no token for the trial");
    assert!(err.is_backpressure());

    // Once tokens are back, the next caller gets the trial and closes the
    // circuit instead of finding the slot still held.
    tokio::time::advance(Duration::from_secs(600)).await;
    gateway
        .call("read", async { Ok::<_, ProviderError>(()) })
        .await
        .expect("trial call runs");
    assert_eq!(gateway.circuit_state(), CircuitStateKind::Closed);
}

#[tokio::test(start_paused = true)]
async fn quota_errors_build_an_escalating_hold() {
    let (gateway, rx) = gateway();
    let quota_fail = || async { Err::<(), _>(ProviderError::QuotaExceeded) };

    // First quota failure arms a 4s hold.
    let _ = gateway.call("read", quota_fail()).await;

    // Second call waits out the hold, then fails again: hold becomes 8s.
    let started = Instant::now();
    let _ = gateway.call("read", quota_fail()).await;
    assert!(started.elapsed() >= Duration::from_secs(4));

    // Third failure: hold 16s, beyond the 10s admission timeout.
    let started = Instant::now();
    let _ = gateway.call("read", quota_fail()).await;
    assert!(started.elapsed() >= Duration::from_secs(8));

    let err = gateway
        .call("read", async { Ok::<_, ProviderError>(()) })
        .await
        .expect_err("hold exceeds admission timeout");
    assert!(err.is_backpressure());

    assert!(
        drain(&rx)
            .iter()
            .any(|e| e.message().contains("quota exceeded"))
    );
}

#[tokio::test(start_paused = true)]
async fn quota_hold_clears_after_success() {
    let (gateway, _rx) = gateway();
    let _ = gateway
        .call("read", async { Err::<(), _>(ProviderError::QuotaExceeded) })
        .await;

    // Wait out the hold with a success; the streak resets.
    gateway
        .call("read", async { Ok::<_, ProviderError>(()) })
        .await
        .expect("held then succeeded");

    let started = Instant::now();
    gateway
        .call("read", async { Ok::<_, ProviderError>(()) })
        .await
        .expect("no hold left");
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn store_gateway_caches_reads_and_invalidates_on_write() {
    let (tx, _rx) = flume::unbounded();
    let store = MockStore::new();
    store.seed("fleet/g1", json!({"lat": 1.0, "lon": 2.0}));
    let facade = StoreGateway::new(store.clone(), &config(), &CacheConfig::default(), tx);

    let first = facade
        .read_cached("fleet/g1", TtlTier::Short)
        .await
        .expect("read");
    let second = facade
        .read_cached("fleet/g1", TtlTier::Short)
        .await
        .expect("cached read");
    assert_eq!(first, second);
    assert_eq!(store.reads(), 1);

    facade
        .write("fleet/g1", json!({"lat": 9.0, "lon": 9.0}))
        .await
        .expect("write");
    let fresh = facade
        .read_cached("fleet/g1", TtlTier::Short)
        .await
        .expect("refetched read")
        .expect("row");
    assert_eq!(fresh["lat"], json!(9.0));
    assert_eq!(store.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_rows_read_as_none_and_are_cached() {
    let (tx, _rx) = flume::unbounded();
    let store = MockStore::new();
    let facade = StoreGateway::new(store.clone(), &config(), &CacheConfig::default(), tx);

    assert_eq!(
        facade
            .read_cached("fleet/unknown", TtlTier::Short)
            .await
            .expect("read"),
        None
    );
    assert_eq!(
        facade
            .read_cached("fleet/unknown", TtlTier::Short)
            .await
            .expect("cached read"),
        None
    );
    assert_eq!(store.reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn broadcast_reports_delivery_per_target() {
    let (tx, _rx) = flume::unbounded();
    let messenger = MockMessenger::new();
    messenger.failures.push(ProviderError::Gone("left".into()));
    let facade = MessengerGateway::new(messenger.clone(), &config(), tx);

    let batch = vec![
        (Target::from("g1"), json!({"n": 1})),
        (Target::from("g2"), json!({"n": 2})),
    ];
    let results = facade.broadcast(&batch).await;

    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_err(), "first target failed");
    assert!(results[1].1.is_ok(), "second target delivered");
    assert_eq!(messenger.sent_count(), 1);
}
