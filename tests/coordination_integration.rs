//! Integration tests for the Redis-backed coordination primitives.
//!
//! These tests run against a real Redis instance; each test uses its own
//! random namespace so runs never collide.
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --test coordination_integration -- --ignored

use std::time::Duration;

use uuid::Uuid;

use crawld::coordination::{BreakerState, CircuitBreaker, Coordinator, SeenUrls};

async fn test_coordinator() -> Coordinator {
    let url = std::env::var("REDIS_URL")
        .expect("REDIS_URL environment variable must be set for integration tests");

    let namespace = format!("crawld-itest-{}", Uuid::new_v4().simple());
    Coordinator::connect(&url, &namespace)
        .await
        .expect("Should connect to Redis")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test coordination_integration -- --ignored
async fn test_breaker_open_half_open_reopen_cycle() {
    let coordinator = test_coordinator().await;
    let breaker = CircuitBreaker::new(coordinator, 3, Duration::from_secs(2));
    let resource = "proxy:1";

    assert_eq!(
        breaker.state(resource).await.unwrap(),
        BreakerState::Closed
    );

    // Two failures stay under the threshold.
    assert!(!breaker.record_failure(resource).await.unwrap());
    assert!(!breaker.record_failure(resource).await.unwrap());

    // The third trips it.
    assert!(breaker.record_failure(resource).await.unwrap());
    assert_eq!(breaker.state(resource).await.unwrap(), BreakerState::Open);
    assert!(breaker.is_open(resource).await.unwrap());

    // The open key expires after the cooldown; the half-open marker
    // outlives it.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(
        breaker.state(resource).await.unwrap(),
        BreakerState::HalfOpen
    );
    assert!(!breaker.is_open(resource).await.unwrap());

    // One failed probe re-opens immediately, no threshold needed.
    assert!(breaker.record_failure(resource).await.unwrap());
    assert_eq!(breaker.state(resource).await.unwrap(), BreakerState::Open);

    // A success clears everything.
    breaker.record_success(resource).await.unwrap();
    assert_eq!(
        breaker.state(resource).await.unwrap(),
        BreakerState::Closed
    );
}

#[tokio::test]
#[ignore]
async fn test_lock_mutual_exclusion_and_release() {
    let coordinator = test_coordinator().await;

    let guard = coordinator
        .try_lock("claim", Duration::from_secs(10))
        .await
        .unwrap()
        .expect("First acquire should succeed");

    // Held: a second acquire is refused.
    assert!(coordinator
        .try_lock("claim", Duration::from_secs(10))
        .await
        .unwrap()
        .is_none());

    // Released by the holder, it becomes acquirable again.
    assert!(guard.release().await.unwrap());
    assert!(coordinator
        .try_lock("claim", Duration::from_secs(10))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
#[ignore]
async fn test_stale_guard_cannot_release_a_new_holders_lock() {
    let coordinator = test_coordinator().await;

    let stale = coordinator
        .try_lock("expiry", Duration::from_secs(1))
        .await
        .unwrap()
        .expect("First acquire should succeed");

    // Let the key expire, then have a second holder take over.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let fresh = coordinator
        .try_lock("expiry", Duration::from_secs(10))
        .await
        .unwrap()
        .expect("Expired lock should be reacquirable");

    // The stale guard's token no longer matches: release must refuse and
    // must not disturb the new holder.
    assert!(!stale.release().await.unwrap());
    assert!(coordinator
        .try_lock("expiry", Duration::from_secs(10))
        .await
        .unwrap()
        .is_none());

    assert!(fresh.release().await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_seen_set_deduplicates_equivalent_urls() {
    let coordinator = test_coordinator().await;
    let seen = SeenUrls::new(coordinator);
    let scope = Some(1);

    assert!(!seen
        .is_seen("http://example.com/page?b=2&a=1", scope)
        .await
        .unwrap());

    // Marked under one spelling, found under every equivalent one.
    assert!(seen
        .mark_seen("HTTP://Example.COM:80/page?a=1&b=2", scope)
        .await
        .unwrap());
    assert!(seen
        .is_seen("http://example.com/page?b=2&a=1", scope)
        .await
        .unwrap());

    // Re-marking an equivalent form is not new.
    assert!(!seen
        .mark_seen("http://example.com/page?a=1&b=2#frag", scope)
        .await
        .unwrap());

    // Other scopes are unaffected.
    assert!(!seen
        .is_seen("http://example.com/page?a=1&b=2", Some(2))
        .await
        .unwrap());
}
