//! In-process fallback backend
//!
//! Always-present cache holding a shadow copy of every write. Entries carry
//! an absolute expiry taken from the injected clock; an expired entry is
//! purged on read and reported absent. While the map is past the sweep
//! threshold, expired entries are swept in bulk at most once per interval.

use crate::cache::{CacheBackend, CacheError};
use crate::clock::SharedClock;
use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct FallbackEntry {
    value: String,
    expires_at_ms: Option<i64>,
}

impl FallbackEntry {
    fn new(value: String, ttl: Option<Duration>, now_ms: i64) -> Self {
        Self {
            value,
            expires_at_ms: ttl.map(|t| now_ms + t.as_millis() as i64),
        }
    }

    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// Moka-backed in-process cache with clock-driven lazy expiry
pub struct MemoryBackend {
    cache: Cache<String, FallbackEntry>,
    clock: SharedClock,
    sweep_threshold: u64,
    sweep_interval_ms: i64,
    last_sweep_ms: AtomicI64,
}

impl MemoryBackend {
    /// Create a backend bounded to `max_entries`. While more than
    /// `sweep_threshold` entries are held, writes sweep expired keys no more
    /// often than every `sweep_interval`.
    pub fn new(
        clock: SharedClock,
        max_entries: u64,
        sweep_threshold: u64,
        sweep_interval: Duration,
    ) -> Self {
        let cache = Cache::builder().max_capacity(max_entries).build();
        let now = clock.now_millis();

        Self {
            cache,
            clock,
            sweep_threshold,
            sweep_interval_ms: sweep_interval.as_millis() as i64,
            last_sweep_ms: AtomicI64::new(now),
        }
    }

    /// Approximate number of held entries (expired ones included until purged)
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Remove every expired entry; returns how many were purged
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let expired: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        let mut purged = 0;
        for key in expired {
            if self.remove_if_expired(&key, now).await {
                purged += 1;
            }
        }

        if purged > 0 {
            debug!("Fallback sweep purged {} expired entries", purged);
        }
        purged
    }

    /// Atomically drop `key` only if it is still expired, so a concurrent
    /// fresh write is never lost.
    async fn remove_if_expired(&self, key: &str, now_ms: i64) -> bool {
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|maybe| {
                let op = match maybe {
                    Some(entry) if entry.value().is_expired(now_ms) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        matches!(result, CompResult::Removed(_))
    }

    async fn maybe_sweep(&self) {
        if self.cache.entry_count() <= self.sweep_threshold {
            return;
        }

        let now = self.clock.now_millis();
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        if now - last < self.sweep_interval_ms {
            return;
        }
        // Claiming the slot makes this writer the only sweeper for the interval
        if self
            .last_sweep_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.sweep_expired().await;
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_millis();

        match self.cache.get(key).await {
            Some(entry) if entry.is_expired(now) => {
                self.remove_if_expired(key, now).await;
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = FallbackEntry::new(value.to_string(), ttl, self.clock.now_millis());
        self.cache.insert(key.to_string(), entry).await;
        self.maybe_sweep().await;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let now = self.clock.now_millis();
        let fresh = FallbackEntry::new(value.to_string(), Some(ttl), now);

        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|maybe| {
                let op = match maybe {
                    Some(entry) if !entry.value().is_expired(now) => Op::Nop,
                    _ => Op::Put(fresh),
                };
                std::future::ready(op)
            })
            .await;

        let created = matches!(
            result,
            CompResult::Inserted(_) | CompResult::ReplacedWith(_)
        );
        if created {
            self.maybe_sweep().await;
        }
        Ok(created)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn increment(
        &self,
        key: &str,
        amount: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let now = self.clock.now_millis();

        // Read-modify-write inside a single per-key compute step
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|maybe| {
                let op = match maybe {
                    Some(entry) if !entry.value().is_expired(now) => {
                        let current = entry.value();
                        match current.value.parse::<i64>() {
                            Ok(n) => Op::Put(FallbackEntry {
                                value: (n + amount).to_string(),
                                expires_at_ms: current.expires_at_ms,
                            }),
                            Err(_) => Op::Nop,
                        }
                    }
                    _ => Op::Put(FallbackEntry::new(amount.to_string(), ttl, now)),
                };
                std::future::ready(op)
            })
            .await;

        let value = match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => {
                entry.into_value().value.parse::<i64>().ok()
            }
            _ => None,
        };

        self.maybe_sweep().await;
        value.ok_or_else(|| CacheError::NotAnInteger(key.to_string()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
