//! LeadBot Gate
//!
//! Cache-backed coordination layer in front of lead qualification bots.
//!
//! # Features
//!
//! - **Resilient Cache**: Redis primary with an in-process moka fallback and
//!   a circuit breaker; callers never see a store failure
//! - **Rate Limiting**: fixed one-minute windows, per client and global
//! - **Webhook Gate**: redelivery dedup, per-contact processing locks,
//!   sticky bot routing and deferred CRM tag actions
//! - **Performance Tracking**: rolling latency/outcome windows, AI latency
//!   compliance and cost savings, persisted lifetime counters
//!
//! # Architecture
//!
//! ```text
//! CRM webhook ──► edge limiter ──► WebhookGate ──► BotEngine (lead/buyer/seller)
//!                                      │                │
//!                                      │                └─► CrmClient (reply, actions)
//!                                      │
//!                                      ├── CacheStore (Redis + moka)
//!                                      └── PerformanceTracker
//! ```

pub mod cache;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod gate;
pub mod performance;
pub mod rate_limit;
pub mod server;
pub mod services;

pub use cache::{CacheBackend, CacheConfig, CacheError, CacheStats, CacheStore, MemoryBackend, RedisBackend};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use collaborators::{
    BotEngine, BotRegistry, BotReply, BotRequest, BotType, CollaboratorError, ContactMetadata,
    CrmAction, CrmClient,
};
pub use config::Config;
pub use gate::{
    DeferredTasks, GateConfig, LockPolicy, SkipReason, ThrottleReason, WebhookEvent, WebhookGate,
    WebhookOutcome,
};
pub use performance::{PerformanceReport, PerformanceSnapshot, PerformanceTracker, TrackerConfig};
pub use rate_limit::{RateDecision, RateLimitConfig, RateLimiter};
pub use services::Services;
