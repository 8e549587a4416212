//! Resilient Cache Store
//!
//! Key/value store with TTL, write-through fallback and atomic counters.
//! Every coordination primitive in the gate (rate counters, dedup markers,
//! processing locks, bot assignments, metrics snapshots) is a TTL-scoped key
//! in this store.
//!
//! # Backends
//!
//! ```text
//! CacheStore ──► primary (Redis, optional, behind a circuit breaker)
//!     │
//!     └────────► fallback (in-process moka map, always present)
//! ```
//!
//! Writes go to both backends. Reads try the primary and fall through to
//! the fallback on a miss or any primary error. Primary errors are logged
//! and absorbed; callers never see them.

pub mod breaker;
pub mod keys;
pub mod memory;
pub mod redis;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;

use crate::clock::SharedClock;
use crate::performance::PerformanceTracker;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Error types for cache backends
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Value at {0} is not an integer")]
    NotAnInteger(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// A single cache backend
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value; `None` means no expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Create the key only if absent; `true` if this call created it
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomically add `amount`; `ttl` applies only when the key is created
    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>)
        -> Result<i64, CacheError>;

    fn name(&self) -> &'static str;
}

/// Cache store configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Fallback capacity bound
    pub fallback_max_entries: u64,
    /// Sweep expired fallback entries once more than this many are held
    pub fallback_sweep_threshold: u64,
    /// Minimum spacing between fallback sweeps
    pub fallback_sweep_interval: Duration,
    /// Primary circuit breaker
    pub breaker: CircuitBreakerConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fallback_max_entries: 100_000,
            fallback_sweep_threshold: 10_000,
            fallback_sweep_interval: Duration::from_secs(60),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Store health for readiness checks
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub primary: Option<String>,
    pub primary_state: Option<CircuitState>,
    pub primary_errors: u64,
    pub fallback_entries: u64,
}

/// Primary/fallback cache store
pub struct CacheStore {
    primary: Option<Arc<dyn CacheBackend>>,
    fallback: Arc<MemoryBackend>,
    breaker: Mutex<CircuitBreaker>,
    primary_errors: AtomicU64,
    tracker: Option<Arc<PerformanceTracker>>,
    clock: SharedClock,
}

impl CacheStore {
    /// Create a store; `primary` is optional
    pub fn new(
        primary: Option<Arc<dyn CacheBackend>>,
        clock: SharedClock,
        config: CacheConfig,
    ) -> Self {
        let fallback = Arc::new(MemoryBackend::new(
            clock.clone(),
            config.fallback_max_entries,
            config.fallback_sweep_threshold,
            config.fallback_sweep_interval,
        ));
        let breaker = CircuitBreaker::new(config.breaker, clock.now_millis());

        Self {
            primary,
            fallback,
            breaker: Mutex::new(breaker),
            primary_errors: AtomicU64::new(0),
            tracker: None,
            clock,
        }
    }

    /// Fallback-only store
    pub fn in_memory(clock: SharedClock) -> Self {
        Self::new(None, clock, CacheConfig::default())
    }

    /// Report every lookup to a performance tracker
    pub fn with_tracker(mut self, tracker: Arc<PerformanceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Primary backend if configured and the breaker allows a call
    fn primary(&self) -> Option<&Arc<dyn CacheBackend>> {
        let primary = self.primary.as_ref()?;
        let now = self.clock.now_millis();
        if self.breaker.lock().can_call(now) {
            Some(primary)
        } else {
            None
        }
    }

    fn primary_succeeded(&self) {
        self.breaker.lock().record_success(self.clock.now_millis());
    }

    fn primary_failed(&self, op: &str, key: &str, err: &CacheError) {
        self.primary_errors.fetch_add(1, Ordering::Relaxed);
        self.breaker.lock().record_failure(self.clock.now_millis());
        warn!(op, key, error = %err, "Primary cache failed, using fallback");
    }

    /// Read a value. Primary miss or error falls through to the fallback.
    pub async fn get(&self, key: &str) -> Option<String> {
        let started = Instant::now();
        let value = self.get_inner(key).await;

        if let Some(tracker) = &self.tracker {
            tracker.record_cache_lookup(value.is_some(), started.elapsed());
        }
        value
    }

    async fn get_inner(&self, key: &str) -> Option<String> {
        if let Some(primary) = self.primary() {
            match primary.get(key).await {
                Ok(Some(value)) => {
                    self.primary_succeeded();
                    return Some(value);
                }
                Ok(None) => self.primary_succeeded(),
                Err(e) => self.primary_failed("get", key, &e),
            }
        }

        match self.fallback.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Fallback cache read failed");
                None
            }
        }
    }

    /// Write-through to both backends. `true` if at least one accepted it.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let mut stored = false;

        if let Some(primary) = self.primary() {
            match primary.set(key, value, Some(ttl)).await {
                Ok(()) => {
                    self.primary_succeeded();
                    stored = true;
                }
                Err(e) => self.primary_failed("set", key, &e),
            }
        }

        match self.fallback.set(key, value, Some(ttl)).await {
            Ok(()) => stored = true,
            Err(e) => warn!(key, error = %e, "Fallback cache write failed"),
        }

        debug!(key, ttl_secs = ttl.as_secs(), "Cache SET");
        stored
    }

    /// Atomic acquire-if-absent. The primary is authoritative when reachable;
    /// a successful acquire is shadowed into the fallback.
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        if let Some(primary) = self.primary() {
            match primary.set_if_absent(key, value, ttl).await {
                Ok(created) => {
                    self.primary_succeeded();
                    if created {
                        if let Err(e) = self.fallback.set(key, value, Some(ttl)).await {
                            warn!(key, error = %e, "Fallback shadow write failed");
                        }
                    }
                    return created;
                }
                Err(e) => self.primary_failed("set_if_absent", key, &e),
            }
        }

        match self.fallback.set_if_absent(key, value, ttl).await {
            Ok(created) => created,
            Err(e) => {
                warn!(key, error = %e, "Fallback set_if_absent failed");
                false
            }
        }
    }

    /// Delete from both backends. `true` if both calls completed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut ok = true;

        if let Some(primary) = self.primary() {
            match primary.delete(key).await {
                Ok(_) => self.primary_succeeded(),
                Err(e) => {
                    self.primary_failed("delete", key, &e);
                    ok = false;
                }
            }
        }

        if let Err(e) = self.fallback.delete(key).await {
            warn!(key, error = %e, "Fallback delete failed");
            ok = false;
        }
        ok
    }

    /// Atomic increment. Uses the primary when reachable and mirrors the
    /// resulting count into the fallback; otherwise increments the fallback.
    ///
    /// Errors only when the fallback holds a non-integer value.
    pub async fn increment(
        &self,
        key: &str,
        amount: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        if let Some(primary) = self.primary() {
            match primary.increment(key, amount, ttl).await {
                Ok(value) => {
                    self.primary_succeeded();
                    if let Err(e) = self.fallback.set(key, &value.to_string(), ttl).await {
                        warn!(key, error = %e, "Fallback counter mirror failed");
                    }
                    return Ok(value);
                }
                Err(e) => self.primary_failed("increment", key, &e),
            }
        }

        self.fallback.increment(key, amount, ttl).await
    }

    /// Read and deserialize a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Cached value is not valid JSON");
                None
            }
        }
    }

    /// Serialize and store a JSON value
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let raw = serde_json::to_string(value)?;
        Ok(self.set(key, &raw, ttl).await)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            primary: self.primary.as_ref().map(|p| p.name().to_string()),
            primary_state: self.primary.as_ref().map(|_| self.breaker.lock().state()),
            primary_errors: self.primary_errors.load(Ordering::Relaxed),
            fallback_entries: self.fallback.entry_count(),
        }
    }
}
