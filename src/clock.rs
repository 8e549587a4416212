//! Time Source
//!
//! Every component that reads wall-clock time or waits goes through a
//! [`Clock`], so lock polling, deferred tasks and TTL expiry can be driven
//! deterministically in tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Injectable time source
#[async_trait]
pub trait Clock: Send + Sync {
    /// Milliseconds since the unix epoch
    fn now_millis(&self) -> i64;

    /// Suspend the current task for `duration`
    async fn sleep(&self, duration: Duration);

    /// Seconds since the unix epoch
    fn now_secs(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Real wall clock backed by chrono and tokio timers
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests.
///
/// `sleep` advances virtual time by the requested duration and yields once,
/// so code that polls or delays runs without real waiting.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Start at the given unix time (milliseconds)
    pub fn new(start_millis: i64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicI64::new(start_millis),
        })
    }

    /// Start at a fixed, minute-aligned instant (2024-01-01T00:00:00Z)
    pub fn at_epoch() -> Arc<Self> {
        Self::new(1_704_067_200_000)
    }

    /// Move virtual time forward
    pub fn advance(&self, duration: Duration) {
        self.millis
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
