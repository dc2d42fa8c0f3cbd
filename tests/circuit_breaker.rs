use std::time::Duration;

use fleetcast::config::BreakerConfig;
use fleetcast::gateway::{CircuitBreaker, CircuitStateKind, Transition};

fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
    CircuitBreaker::new(&BreakerConfig {
        threshold,
        cooldown: Duration::from_secs(cooldown_secs),
    })
}

#[tokio::test(start_paused = true)]
async fn stays_closed_below_threshold() {
    let breaker = breaker(3, 300);
    assert!(breaker.on_failure().is_none());
    assert!(breaker.on_failure().is_none());
    assert_eq!(breaker.state(), CircuitStateKind::Closed);
    assert_eq!(breaker.failure_count(), 2);
    assert!(breaker.preflight().is_ok());
}

#[tokio::test(start_paused = true)]
async fn opens_on_threshold_and_fails_fast() {
    let breaker = breaker(3, 300);
    breaker.on_failure();
    breaker.on_failure();
    assert_eq!(breaker.on_failure(), Some(Transition::Opened));
    assert_eq!(breaker.state(), CircuitStateKind::Open);

    let rejected = breaker.preflight().expect_err("open circuit rejects");
    assert!(rejected.retry_after > Duration::ZERO);
    assert!(rejected.retry_after <= Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn retry_after_shrinks_as_cooldown_elapses() {
    let breaker = breaker(1, 300);
    breaker.on_failure();

    let first = breaker.preflight().expect_err("open").retry_after;
    tokio::time::advance(Duration::from_secs(100)).await;
    let second = breaker.preflight().expect_err("still open").retry_after;
    assert!(second < first);
    assert!(second <= Duration::from_secs(200));
}

#[tokio::test(start_paused = true)]
async fn cooldown_admits_exactly_one_trial_call() {
    let breaker = breaker(1, 300);
    breaker.on_failure();

    tokio::time::advance(Duration::from_secs(300)).await;
    assert!(breaker.preflight().is_ok(), "trial slot after cooldown");
    assert_eq!(breaker.state(), CircuitStateKind::HalfOpen);

    // Second caller during the trial is rejected immediately.
    let rejected = breaker.preflight().expect_err("trial slot taken");
    assert_eq!(rejected.retry_after, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn aborted_trial_frees_the_slot_for_the_next_caller() {
    let breaker = breaker(1, 300);
    breaker.on_failure();

    tokio::time::advance(Duration::from_secs(300)).await;
    breaker.preflight().expect("trial slot");
    // The claimant backed out before any network attempt was made.
    breaker.abort_trial();

    assert_eq!(breaker.state(), CircuitStateKind::HalfOpen);
    breaker.preflight().expect("slot reclaimed");
    assert_eq!(breaker.on_success(), Some(Transition::Closed));
}

#[tokio::test(start_paused = true)]
async fn successful_trial_closes_and_resets() {
    let breaker = breaker(2, 300);
    breaker.on_failure();
    breaker.on_failure();

    tokio::time::advance(Duration::from_secs(300)).await;
    breaker.preflight().expect("trial");
    assert_eq!(breaker.on_success(), Some(Transition::Closed));
    assert_eq!(breaker.state(), CircuitStateKind::Closed);
    assert_eq!(breaker.failure_count(), 0);

    // The reset count means the next single failure does not re-open.
    assert!(breaker.on_failure().is_none());
    assert_eq!(breaker.state(), CircuitStateKind::Closed);
}

#[tokio::test(start_paused = true)]
async fn failed_trial_reopens_with_fresh_cooldown() {
    let breaker = breaker(1, 300);
    breaker.on_failure();

    tokio::time::advance(Duration::from_secs(300)).await;
    breaker.preflight().expect("trial");
    assert_eq!(breaker.on_failure(), Some(Transition::Reopened));
    assert_eq!(breaker.state(), CircuitStateKind::Open);

    // Cooldown re-armed from the reopen, not from the original open.
    tokio::time::advance(Duration::from_secs(150)).await;
    let rejected = breaker.preflight().expect_err("cooling down again");
    assert!(rejected.retry_after > Duration::from_secs(100));
}

#[tokio::test(start_paused = true)]
async fn success_in_closed_state_is_quiet() {
    let breaker = breaker(3, 300);
    breaker.on_failure();
    assert_eq!(breaker.on_success(), None);
    assert_eq!(breaker.failure_count(), 0, "success clears the streak");
}

#[tokio::test(start_paused = true)]
async fn failures_while_open_change_nothing() {
    let breaker = breaker(1, 300);
    breaker.on_failure();
    assert!(breaker.on_failure().is_none());
    assert_eq!(breaker.state(), CircuitStateKind::Open);
}
