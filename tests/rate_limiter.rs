use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use fleetcast::config::LimiterConfig;
use fleetcast::gateway::RateLimiter;

fn limiter(max_per_minute: u32) -> RateLimiter {
    RateLimiter::new(&LimiterConfig {
        max_per_minute,
        acquire_timeout: Duration::from_secs(10),
    })
}

#[tokio::test(start_paused = true)]
async fn burst_within_capacity_is_immediate() {
    let limiter = limiter(5);
    let started = Instant::now();
    for _ in 0..5 {
        limiter
            .acquire(Duration::from_secs(10))
            .await
            .expect("token");
    }
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn depleted_bucket_waits_for_refill() {
    // 2 per minute refills one token every 30 seconds.
    let limiter = limiter(2);
    limiter.acquire(Duration::from_secs(1)).await.expect("one");
    limiter.acquire(Duration::from_secs(1)).await.expect("two");

    let started = Instant::now();
    limiter
        .acquire(Duration::from_secs(60))
        .await
        .expect("refilled token");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(29), "waited {waited:?}");
    assert!(waited <= Duration::from_secs(31), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn rejects_without_sleeping_when_wait_exceeds_deadline() {
    let limiter = limiter(2);
    limiter.acquire(Duration::from_secs(1)).await.expect("one");
    limiter.acquire(Duration::from_secs(1)).await.expect("two");

    // Next token is 30s away; a 10s admission timeout cannot be met.
    let started = Instant::now();
    let err = limiter
        .acquire(Duration::from_secs(10))
        .await
        .expect_err("no token in time");
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(err.waited < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn try_acquire_never_waits() {
    let limiter = limiter(1);
    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(limiter.try_acquire());
}

#[tokio::test(start_paused = true)]
async fn repeated_acquires_on_a_drained_bucket_always_complete() {
    // 3 per minute refills one token every 20 seconds. Each wait must land
    // on a refill boundary even when float rounding leaves the bucket a
    // hair short of a whole token.
    let limiter = limiter(3);
    for _ in 0..3 {
        assert!(limiter.try_acquire());
    }

    let started = Instant::now();
    for _ in 0..30 {
        limiter
            .acquire(Duration::from_secs(60))
            .await
            .expect("token within one refill period");
    }
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(590), "waited {waited:?}");
    assert!(waited <= Duration::from_secs(610), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn utilization_tracks_consumption() {
    let limiter = limiter(4);
    assert_eq!(limiter.utilization(), 0.0);
    limiter.acquire(Duration::from_secs(1)).await.expect("token");
    limiter.acquire(Duration::from_secs(1)).await.expect("token");
    assert!((limiter.utilization() - 0.5).abs() < 1e-9);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any strict 60-second window admits at most a full bucket plus one
    /// minute of refill, regardless of demand pattern.
    #[test]
    fn rolling_window_stays_under_ceiling(capacity in 1u32..20, demand in 1usize..100) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .expect("runtime");

        runtime.block_on(async move {
            let limiter = RateLimiter::new(&LimiterConfig {
                max_per_minute: capacity,
                acquire_timeout: Duration::from_secs(3600),
            });

            let mut grants = Vec::with_capacity(demand);
            for _ in 0..demand {
                limiter
                    .acquire(Duration::from_secs(3600))
                    .await
                    .expect("generous timeout");
                grants.push(Instant::now());
            }

            let ceiling = 2 * capacity as usize;
            for (i, start) in grants.iter().enumerate() {
                let in_window = grants[i..]
                    .iter()
                    .take_while(|g| g.saturating_duration_since(*start) < Duration::from_secs(60))
                    .count();
                prop_assert!(
                    in_window <= ceiling,
                    "{in_window} grants in one window, ceiling {ceiling}"
                );
            }
            Ok(())
        })?;
    }
}
