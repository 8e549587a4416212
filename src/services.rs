//! Service wiring
//!
//! Everything the webhook path needs is built once here, shared through
//! `Arc`s, and drained on shutdown.

use crate::cache::{CacheBackend, CacheStore, RedisBackend};
use crate::clock::{SharedClock, SystemClock};
use crate::collaborators::{BotRegistry, CrmClient, HttpBotEngine, HttpCrmClient};
use crate::config::Config;
use crate::gate::WebhookGate;
use crate::performance::PerformanceTracker;
use crate::rate_limit::{EdgeLimiter, RateLimiter};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared services behind the HTTP layer
pub struct Services {
    pub cache: Arc<CacheStore>,
    pub tracker: Arc<PerformanceTracker>,
    pub gate: Arc<WebhookGate>,
    pub edge: EdgeLimiter,
}

impl Services {
    /// Assemble services from already-built collaborators
    pub fn new(
        config: &Config,
        clock: SharedClock,
        primary: Option<Arc<dyn CacheBackend>>,
        engines: BotRegistry,
        crm: Arc<dyn CrmClient>,
    ) -> Self {
        let tracker = Arc::new(PerformanceTracker::new(config.tracker.clone(), clock.clone()));
        let cache = Arc::new(
            CacheStore::new(primary, clock, config.cache.clone())
                .with_tracker(tracker.clone()),
        );
        let gate = Arc::new(WebhookGate::new(
            cache.clone(),
            engines,
            crm,
            tracker.clone(),
            config.gate.clone(),
        ));
        let edge = EdgeLimiter::new(RateLimiter::new(cache.clone()), config.rate_limit.clone());

        Self {
            cache,
            tracker,
            gate,
            edge,
        }
    }

    /// Build production services: Redis primary (if configured and
    /// reachable) plus HTTP collaborators
    pub async fn from_config(config: &Config) -> Result<Self> {
        let primary = match &config.redis_url {
            Some(url) => connect_primary(url).await,
            None => {
                info!("REDIS_URL not set, running with in-process cache only");
                None
            }
        };

        let collab = &config.collaborators;
        let crm_url = collab
            .crm_base_url
            .as_deref()
            .context("LEADBOT_CRM_BASE_URL must be set")?;
        let crm_key = collab
            .crm_api_key
            .as_deref()
            .context("LEADBOT_CRM_API_KEY must be set")?;
        let crm: Arc<dyn CrmClient> = Arc::new(HttpCrmClient::new(crm_url, crm_key, collab.timeout)?);

        let mut engines = BotRegistry::new();
        for (bot, url) in &collab.engine_urls {
            let engine = HttpBotEngine::new(*bot, url.clone(), collab.timeout)?;
            engines = engines.with_engine(*bot, Arc::new(engine));
        }
        if engines.get(config.gate.default_bot).is_none() {
            warn!(
                bot = %config.gate.default_bot,
                "No engine configured for the default bot type"
            );
        }
        info!(engines = engines.len(), "Bot engines registered");

        Ok(Self::new(config, SystemClock::shared(), primary, engines, crm))
    }

    /// Restore persisted metrics
    pub async fn start(&self) {
        if !self.tracker.load(&self.cache).await {
            info!("No performance snapshot found, starting fresh");
        }
    }

    /// Periodic metrics persistence until `shutdown` flips to true
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.tracker
            .clone()
            .spawn_persistence(self.cache.clone(), shutdown)
    }

    /// Finish deferred work and flush metrics
    pub async fn shutdown(&self) {
        let pending = self.gate.deferred().pending();
        if pending > 0 {
            info!(pending, "Waiting for deferred tasks");
        }
        self.gate.deferred().drain().await;

        if !self.tracker.persist(&self.cache).await {
            warn!("Final performance snapshot was not stored");
        }
    }
}

/// Connect to Redis, or run without a primary if it is unreachable
async fn connect_primary(url: &str) -> Option<Arc<dyn CacheBackend>> {
    match tokio::time::timeout(REDIS_CONNECT_TIMEOUT, RedisBackend::connect(url)).await {
        Ok(Ok(backend)) => Some(Arc::new(backend)),
        Ok(Err(e)) => {
            warn!(error = %e, "Redis unavailable, using in-process cache only");
            None
        }
        Err(_) => {
            warn!("Redis connect timed out, using in-process cache only");
            None
        }
    }
}
