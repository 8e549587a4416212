//! Cache Store Integration Tests
//!
//! Fallback behaviour with an unreachable primary and metrics persistence
//! across service restarts.

mod common;

use common::{DownBackend, Harness};
use leadbot_gate::cache::CircuitState;
use leadbot_gate::{
    CacheBackend, CacheStore, GateConfig, ManualClock, PerformanceTracker, TrackerConfig,
    WebhookEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn down_store() -> (CacheStore, Arc<ManualClock>) {
    let clock = ManualClock::at_epoch();
    let primary: Arc<dyn CacheBackend> = Arc::new(DownBackend);
    let store = CacheStore::new(Some(primary), clock.clone(), Default::default());
    (store, clock)
}

#[tokio::test]
async fn test_round_trip_with_primary_down() {
    let (store, clock) = down_store();

    assert!(store.set("assigned_bot:c1", "seller", Duration::from_secs(10)).await);
    assert_eq!(store.get("assigned_bot:c1").await.as_deref(), Some("seller"));

    clock.advance(Duration::from_secs(11));
    assert!(store.get("assigned_bot:c1").await.is_none());
}

#[tokio::test]
async fn test_atomics_with_primary_down() {
    let (store, _clock) = down_store();
    let ttl = Duration::from_secs(60);

    assert!(store.set_if_absent("lock:c1", "token-a", ttl).await);
    assert!(!store.set_if_absent("lock:c1", "token-b", ttl).await);

    assert_eq!(assert_ok!(store.increment("rate:webhook:1", 1, Some(ttl)).await), 1);
    assert_eq!(assert_ok!(store.increment("rate:webhook:1", 4, Some(ttl)).await), 5);
}

#[tokio::test]
async fn test_breaker_opens_on_dead_primary() {
    let (store, _clock) = down_store();

    for i in 0..10 {
        store.get(&format!("k{}", i)).await;
    }

    let stats = store.stats();
    assert_eq!(stats.primary_state, Some(CircuitState::Open));
    // Open breaker stops hitting the primary
    assert_eq!(stats.primary_errors, 5);
}

#[tokio::test]
async fn test_metrics_survive_restart() {
    let (h, clock) = Harness::manual(GateConfig::default());
    h.services
        .gate
        .handle(WebhookEvent::new("c1", "Hello"))
        .await;
    let before = h.services.tracker.snapshot();
    assert_eq!(before.ai_calls, 1);
    assert!(h.services.tracker.persist(&h.services.cache).await);

    // Fresh tracker over the same store picks the counters back up
    let restarted = PerformanceTracker::new(TrackerConfig::default(), clock);
    assert!(restarted.load(&h.services.cache).await);
    let after = restarted.snapshot();
    assert_eq!(after.ai_calls, before.ai_calls);
    assert_eq!(after.crm_calls, before.crm_calls);
    // Rolling windows start empty; only lifetime totals are restored
    assert_eq!(restarted.report().ai_calls.count, 0);
}

#[tokio::test]
async fn test_shutdown_drains_and_persists() {
    let (h, _clock) = Harness::manual(GateConfig::default());
    h.services
        .gate
        .handle(WebhookEvent::new("c1", "Hello"))
        .await;

    h.services.shutdown().await;

    assert_eq!(h.services.gate.deferred().pending(), 0);
    let stored = h
        .services
        .cache
        .get("metrics:performance_snapshot")
        .await;
    assert!(stored.is_some());
}
