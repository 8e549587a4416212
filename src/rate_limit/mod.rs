//! Fixed-window Rate Limiting
//!
//! Counts requests per scope in one-minute windows keyed
//! `rate:<scope>:<minute>`. The counter is a CacheStore atomic increment with
//! a 60s TTL, so every instance sharing the primary sees the same budget.
//!
//! Two callers use it: the edge middleware (scope `client:<addr>`, per-client
//! budget) and the webhook gate (scope `webhook`, global budget).

pub mod ip;
pub mod middleware;

pub use ip::{extract_client_ip, normalize_ip};
pub use middleware::{rate_limit, EdgeLimiter, RateLimitRejection};

use crate::cache::{keys, CacheStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Window length
pub const WINDOW: Duration = Duration::from_secs(60);

const WINDOW_SECS: i64 = 60;

/// Paths that bypass the edge limiter by default
pub const DEFAULT_EXEMPT_PATHS: &[&str] = &["/health", "/healthz", "/readyz", "/metrics"];

/// Edge rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per minute per client address
    pub requests_per_minute: u32,
    /// Exact paths that are never limited
    pub exempt_paths: Vec<String>,
    /// Trust X-Forwarded-For / X-Real-IP
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            exempt_paths: DEFAULT_EXEMPT_PATHS.iter().map(|p| p.to_string()).collect(),
            trust_proxy: true,
        }
    }
}

impl RateLimitConfig {
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
    }
}

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) of the next window boundary
    pub reset: i64,
}

impl RateDecision {
    /// Seconds until the window resets, at least 1
    pub fn retry_after(&self, now_secs: i64) -> u64 {
        (self.reset - now_secs).max(1) as u64
    }
}

/// Fixed-window limiter over the shared cache
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<CacheStore>,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }

    pub fn now_secs(&self) -> i64 {
        self.cache.clock().now_secs()
    }

    /// Count one request against `scope` and decide whether it fits in
    /// `limit` for the current minute. Fails open if the counter is unusable.
    pub async fn check(&self, scope: &str, limit: u32) -> RateDecision {
        let minute = self.now_secs().div_euclid(WINDOW_SECS);
        let reset = (minute + 1) * WINDOW_SECS;
        let key = keys::rate(scope, minute);

        let count = match self.cache.increment(&key, 1, Some(WINDOW)).await {
            Ok(count) => count,
            Err(e) => {
                warn!(scope, error = %e, "Rate counter unavailable, allowing request");
                return RateDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset,
                };
            }
        };

        let allowed = count <= i64::from(limit);
        let remaining = (i64::from(limit) - count).max(0) as u32;

        if !allowed {
            debug!(scope, count, limit, "Rate limit exceeded");
        }

        RateDecision {
            allowed,
            limit,
            remaining,
            reset,
        }
    }
}
