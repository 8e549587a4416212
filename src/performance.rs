//! Performance Tracking
//!
//! Rolling-window latency/outcome recorder for cache lookups, bot-engine
//! (AI) calls and CRM calls, plus lifetime counters and cost estimates.
//!
//! Raw events live only in bounded in-process buffers. Lifetime counters are
//! periodically serialized to the cache under `metrics:performance_snapshot`
//! and restored on startup, so totals survive restarts without replaying
//! history.

use crate::cache::{keys, CacheStore};
use crate::clock::SharedClock;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot key name under the `metrics:` namespace
pub const SNAPSHOT_NAME: &str = "performance_snapshot";

/// Tracker configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Rolling window for derived metrics (default: 24h)
    pub window: Duration,
    /// Per-category buffer cap
    pub max_events: usize,
    /// AI calls at or under this latency count as compliant
    pub ai_latency_target: Duration,
    /// Estimated cost of one AI call avoided (USD)
    pub cost_per_ai_call_usd: f64,
    /// How often counters are persisted
    pub persist_interval: Duration,
    /// TTL of the persisted snapshot
    pub snapshot_ttl: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(86_400),
            max_events: 10_000,
            ai_latency_target: Duration::from_millis(2_000),
            cost_per_ai_call_usd: 0.003,
            persist_interval: Duration::from_secs(60),
            snapshot_ttl: Duration::from_secs(86_400 * 30),
        }
    }
}

/// Event categories, one rolling buffer each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricCategory {
    CacheHit,
    CacheMiss,
    AiCall,
    CrmCall,
}

#[derive(Debug, Clone, Copy)]
struct MetricEvent {
    timestamp_ms: i64,
    latency_ms: f64,
    success: bool,
    pattern_shortcut: bool,
}

/// Time- and size-bounded event buffer
#[derive(Debug)]
struct RollingBuffer {
    events: VecDeque<MetricEvent>,
    max_events: usize,
}

impl RollingBuffer {
    fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            max_events,
        }
    }

    fn push(&mut self, event: MetricEvent, cutoff_ms: i64) {
        self.events.push_back(event);
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        self.evict_before(cutoff_ms);
    }

    fn evict_before(&mut self, cutoff_ms: i64) {
        while self
            .events
            .front()
            .is_some_and(|e| e.timestamp_ms < cutoff_ms)
        {
            self.events.pop_front();
        }
    }

    fn recent(&self, cutoff_ms: i64) -> impl Iterator<Item = &MetricEvent> {
        self.events.iter().filter(move |e| e.timestamp_ms >= cutoff_ms)
    }
}

#[derive(Debug)]
struct Buffers {
    cache_hits: RollingBuffer,
    cache_misses: RollingBuffer,
    ai_calls: RollingBuffer,
    crm_calls: RollingBuffer,
}

impl Buffers {
    fn get_mut(&mut self, category: MetricCategory) -> &mut RollingBuffer {
        match category {
            MetricCategory::CacheHit => &mut self.cache_hits,
            MetricCategory::CacheMiss => &mut self.cache_misses,
            MetricCategory::AiCall => &mut self.ai_calls,
            MetricCategory::CrmCall => &mut self.crm_calls,
        }
    }
}

/// Lifetime counters, persisted across restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub ai_calls: u64,
    pub ai_calls_within_target: u64,
    pub ai_failures: u64,
    pub pattern_shortcuts: u64,
    pub ai_latency_total_ms: u64,
    pub crm_calls: u64,
    pub crm_failures: u64,
    pub crm_latency_total_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    ai_calls: AtomicU64,
    ai_calls_within_target: AtomicU64,
    ai_failures: AtomicU64,
    pattern_shortcuts: AtomicU64,
    ai_latency_total_ms: AtomicU64,
    crm_calls: AtomicU64,
    crm_failures: AtomicU64,
    crm_latency_total_ms: AtomicU64,
}

/// Latency summary for one category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: usize,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
}

/// Derived metrics over the rolling window plus lifetime totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub window_secs: u64,
    pub cache_hits: CategoryStats,
    pub cache_misses: CategoryStats,
    pub cache_hit_rate: f64,
    pub ai_calls: CategoryStats,
    pub ai_compliance_rate: f64,
    pub pattern_shortcuts: usize,
    pub crm_calls: CategoryStats,
    pub crm_error_rate: f64,
    pub estimated_savings_usd: f64,
    pub lifetime: PerformanceSnapshot,
    pub lifetime_cache_hit_rate: f64,
    pub lifetime_savings_usd: f64,
}

/// Rolling-window performance and cost tracker
pub struct PerformanceTracker {
    config: TrackerConfig,
    clock: SharedClock,
    buffers: RwLock<Buffers>,
    counters: Counters,
}

impl PerformanceTracker {
    pub fn new(config: TrackerConfig, clock: SharedClock) -> Self {
        let max = config.max_events;
        Self {
            config,
            clock,
            buffers: RwLock::new(Buffers {
                cache_hits: RollingBuffer::new(max),
                cache_misses: RollingBuffer::new(max),
                ai_calls: RollingBuffer::new(max),
                crm_calls: RollingBuffer::new(max),
            }),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn cutoff_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.config.window.as_millis() as i64
    }

    fn push(&self, category: MetricCategory, latency: Duration, success: bool, shortcut: bool) {
        let now = self.clock.now_millis();
        let event = MetricEvent {
            timestamp_ms: now,
            latency_ms: latency.as_secs_f64() * 1_000.0,
            success,
            pattern_shortcut: shortcut,
        };
        let cutoff = self.cutoff_ms(now);
        self.buffers.write().get_mut(category).push(event, cutoff);
    }

    /// Record a cache read
    pub fn record_cache_lookup(&self, hit: bool, latency: Duration) {
        if hit {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.push(MetricCategory::CacheHit, latency, true, false);
        } else {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            self.push(MetricCategory::CacheMiss, latency, true, false);
        }
    }

    /// Record a bot-engine call. `pattern_shortcut` marks replies produced
    /// without a model call.
    pub fn record_ai_call(&self, latency: Duration, success: bool, pattern_shortcut: bool) {
        let c = &self.counters;
        c.ai_calls.fetch_add(1, Ordering::Relaxed);
        c.ai_latency_total_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        if latency <= self.config.ai_latency_target {
            c.ai_calls_within_target.fetch_add(1, Ordering::Relaxed);
        }
        if !success {
            c.ai_failures.fetch_add(1, Ordering::Relaxed);
        }
        if pattern_shortcut {
            c.pattern_shortcuts.fetch_add(1, Ordering::Relaxed);
        }
        self.push(MetricCategory::AiCall, latency, success, pattern_shortcut);

        debug!(
            latency_ms = latency.as_millis() as u64,
            success, pattern_shortcut, "Recorded AI call"
        );
    }

    /// Record a CRM API call
    pub fn record_crm_call(&self, latency: Duration, success: bool) {
        let c = &self.counters;
        c.crm_calls.fetch_add(1, Ordering::Relaxed);
        c.crm_latency_total_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        if !success {
            c.crm_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.push(MetricCategory::CrmCall, latency, success, false);
    }

    /// Compute derived metrics over the rolling window
    pub fn report(&self) -> PerformanceReport {
        let cutoff = self.cutoff_ms(self.clock.now_millis());
        let buffers = self.buffers.read();

        let hits: Vec<&MetricEvent> = buffers.cache_hits.recent(cutoff).collect();
        let misses: Vec<&MetricEvent> = buffers.cache_misses.recent(cutoff).collect();
        let ai: Vec<&MetricEvent> = buffers.ai_calls.recent(cutoff).collect();
        let crm: Vec<&MetricEvent> = buffers.crm_calls.recent(cutoff).collect();

        let target_ms = self.config.ai_latency_target.as_secs_f64() * 1_000.0;
        let compliant = ai.iter().filter(|e| e.latency_ms <= target_ms).count();
        let shortcuts = ai.iter().filter(|e| e.pattern_shortcut).count();
        let crm_failed = crm.iter().filter(|e| !e.success).count();

        let lifetime = self.snapshot();

        PerformanceReport {
            window_secs: self.config.window.as_secs(),
            cache_hits: category_stats(&hits),
            cache_misses: category_stats(&misses),
            cache_hit_rate: hit_rate(hits.len() as u64, misses.len() as u64),
            ai_calls: category_stats(&ai),
            ai_compliance_rate: percent(compliant as u64, ai.len() as u64),
            pattern_shortcuts: shortcuts,
            crm_calls: category_stats(&crm),
            crm_error_rate: percent(crm_failed as u64, crm.len() as u64),
            estimated_savings_usd: (hits.len() + shortcuts) as f64
                * self.config.cost_per_ai_call_usd,
            lifetime_cache_hit_rate: hit_rate(lifetime.cache_hits, lifetime.cache_misses),
            lifetime_savings_usd: (lifetime.cache_hits + lifetime.pattern_shortcuts) as f64
                * self.config.cost_per_ai_call_usd,
            lifetime,
        }
    }

    /// Current lifetime counters
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let c = &self.counters;
        PerformanceSnapshot {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            ai_calls: c.ai_calls.load(Ordering::Relaxed),
            ai_calls_within_target: c.ai_calls_within_target.load(Ordering::Relaxed),
            ai_failures: c.ai_failures.load(Ordering::Relaxed),
            pattern_shortcuts: c.pattern_shortcuts.load(Ordering::Relaxed),
            ai_latency_total_ms: c.ai_latency_total_ms.load(Ordering::Relaxed),
            crm_calls: c.crm_calls.load(Ordering::Relaxed),
            crm_failures: c.crm_failures.load(Ordering::Relaxed),
            crm_latency_total_ms: c.crm_latency_total_ms.load(Ordering::Relaxed),
        }
    }

    /// Replace lifetime counters with a persisted snapshot
    pub fn restore(&self, snapshot: &PerformanceSnapshot) {
        let c = &self.counters;
        c.cache_hits.store(snapshot.cache_hits, Ordering::Relaxed);
        c.cache_misses.store(snapshot.cache_misses, Ordering::Relaxed);
        c.ai_calls.store(snapshot.ai_calls, Ordering::Relaxed);
        c.ai_calls_within_target
            .store(snapshot.ai_calls_within_target, Ordering::Relaxed);
        c.ai_failures.store(snapshot.ai_failures, Ordering::Relaxed);
        c.pattern_shortcuts
            .store(snapshot.pattern_shortcuts, Ordering::Relaxed);
        c.ai_latency_total_ms
            .store(snapshot.ai_latency_total_ms, Ordering::Relaxed);
        c.crm_calls.store(snapshot.crm_calls, Ordering::Relaxed);
        c.crm_failures.store(snapshot.crm_failures, Ordering::Relaxed);
        c.crm_latency_total_ms
            .store(snapshot.crm_latency_total_ms, Ordering::Relaxed);
    }

    /// Write lifetime counters to the cache
    pub async fn persist(&self, cache: &CacheStore) -> bool {
        let key = keys::metrics(SNAPSHOT_NAME);
        match cache
            .set_json(&key, &self.snapshot(), self.config.snapshot_ttl)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to serialize performance snapshot: {}", e);
                false
            }
        }
    }

    /// Restore lifetime counters from the cache, if a snapshot exists
    pub async fn load(&self, cache: &CacheStore) -> bool {
        let key = keys::metrics(SNAPSHOT_NAME);
        match cache.get_json::<PerformanceSnapshot>(&key).await {
            Some(snapshot) => {
                self.restore(&snapshot);
                info!(
                    cache_hits = snapshot.cache_hits,
                    ai_calls = snapshot.ai_calls,
                    crm_calls = snapshot.crm_calls,
                    "Restored performance snapshot"
                );
                true
            }
            None => false,
        }
    }

    /// Persist on a fixed cadence until shutdown, then once more
    pub fn spawn_persistence(
        self: Arc<Self>,
        cache: Arc<CacheStore>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.persist_interval);
            // First tick fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !self.persist(&cache).await {
                            warn!("Performance snapshot was not stored");
                        }
                    }
                    changed = shutdown.changed() => {
                        // A dropped sender means nobody can signal shutdown any more
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            self.persist(&cache).await;
            info!("Performance persistence stopped");
        })
    }
}

/// hits / (hits + misses) × 100, or 0 with no lookups
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    percent(hits, hits + misses)
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Value at index `floor(0.95 * N)` of the sorted list, clamped to the last
/// index. Sorts in place.
pub fn p95(latencies: &mut [f64]) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    latencies.sort_by(|a, b| a.total_cmp(b));
    let idx = ((latencies.len() as f64) * 0.95).floor() as usize;
    latencies[idx.min(latencies.len() - 1)]
}

fn category_stats(events: &[&MetricEvent]) -> CategoryStats {
    if events.is_empty() {
        return CategoryStats::default();
    }
    let mut latencies: Vec<f64> = events.iter().map(|e| e.latency_ms).collect();
    let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;

    CategoryStats {
        count: latencies.len(),
        avg_latency_ms: avg,
        p95_latency_ms: p95(&mut latencies),
    }
}

/// Timer for measuring operation latency
pub struct LatencyTimer {
    start: Instant,
    operation: &'static str,
}

impl LatencyTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        debug!("{}: {}ms", self.operation, elapsed.as_millis());
        elapsed
    }
}
