//! Webhook Gate
//!
//! Orchestrates one inbound message end to end:
//!
//! ```text
//! rate check ─► dedup marker ─► contact lock ─► routing ─► bot engine
//!                                   │                          │
//!                                   │            reply + field updates (CRM)
//!                                   │                          │
//!                                   └──── release ◄── tag actions deferred
//! ```
//!
//! Every path ends in one of four structured outcomes; nothing escapes as a
//! transport failure, so upstream senders never blindly redeliver.

pub mod deferred;
pub mod lock;
pub mod routing;

pub use deferred::{DeferredStats, DeferredTasks};
pub use lock::{LockPolicy, ProcessingLock};
pub use routing::BotRouter;

use crate::cache::{keys, CacheStore};
use crate::collaborators::{
    BotRegistry, BotRequest, BotType, CollaboratorError, ContactMetadata, CrmAction, CrmClient,
};
use crate::performance::{LatencyTimer, PerformanceTracker};
use crate::rate_limit::RateLimiter;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Rate limiter scope for the global webhook budget
pub const WEBHOOK_SCOPE: &str = "webhook";

/// Gate configuration
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Global webhook budget per minute
    pub webhook_rpm: u32,
    /// Window in which an identical message is a redelivery
    pub dedup_ttl: Duration,
    pub lock: LockPolicy,
    /// Sticky assignment lifetime
    pub assignment_ttl: Duration,
    pub default_bot: BotType,
    /// Delay before tag actions reach the CRM
    pub tag_delay: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            webhook_rpm: 300,
            dedup_ttl: Duration::from_secs(300),
            lock: LockPolicy::default(),
            assignment_ttl: Duration::from_secs(604_800),
            default_bot: BotType::Lead,
            tag_delay: Duration::from_secs(30),
        }
    }
}

/// Inbound webhook payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(alias = "contactId")]
    pub contact_id: String,
    #[serde(alias = "body")]
    pub message: String,
    #[serde(default, alias = "locationId")]
    pub location_id: String,
    #[serde(default, alias = "botType")]
    pub bot_type: Option<String>,
    #[serde(default)]
    pub contact: ContactMetadata,
}

impl WebhookEvent {
    pub fn new(contact_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_bot_type(mut self, bot_type: impl Into<String>) -> Self {
        self.bot_type = Some(bot_type.into());
        self
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = location_id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleReason {
    RateLimit,
    ProcessingLock,
}

/// Result of handling one webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed {
        contact_id: String,
        bot_type: BotType,
        temperature: String,
        reply: String,
        /// Tag actions scheduled to run after the delay
        deferred_actions: usize,
    },
    Skipped {
        reason: SkipReason,
    },
    Throttled {
        reason: ThrottleReason,
    },
    Error {
        detail: String,
    },
}

impl WebhookOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Skipped { .. } => "skipped",
            Self::Throttled { .. } => "throttled",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::Error {
            detail: detail.into(),
        }
    }
}

/// Time a CRM call and report it to the tracker
async fn tracked_crm_call<T, F>(
    tracker: &PerformanceTracker,
    operation: &'static str,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    let timer = LatencyTimer::start(operation);
    let result = call.await;
    tracker.record_crm_call(timer.finish(), result.is_ok());
    result
}

/// Dedup, serialization and routing in front of the bot engines
pub struct WebhookGate {
    cache: Arc<CacheStore>,
    limiter: RateLimiter,
    engines: BotRegistry,
    crm: Arc<dyn CrmClient>,
    tracker: Arc<PerformanceTracker>,
    deferred: Arc<DeferredTasks>,
    config: GateConfig,
}

impl WebhookGate {
    pub fn new(
        cache: Arc<CacheStore>,
        engines: BotRegistry,
        crm: Arc<dyn CrmClient>,
        tracker: Arc<PerformanceTracker>,
        config: GateConfig,
    ) -> Self {
        let deferred = Arc::new(DeferredTasks::new(cache.clock().clone()));
        Self {
            limiter: RateLimiter::new(cache.clone()),
            cache,
            engines,
            crm,
            tracker,
            deferred,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn deferred(&self) -> &Arc<DeferredTasks> {
        &self.deferred
    }

    /// Handle one inbound message.
    ///
    /// The work runs on its own task: once the dedup marker is written, a
    /// dropped caller can no longer strand the marker or the contact lock.
    pub async fn handle(self: &Arc<Self>, event: WebhookEvent) -> WebhookOutcome {
        let gate = Arc::clone(self);
        match tokio::spawn(async move { gate.process(event).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Webhook task did not complete");
                WebhookOutcome::error("internal error during dispatch")
            }
        }
    }

    async fn process(&self, event: WebhookEvent) -> WebhookOutcome {
        let contact_id = event.contact_id.trim().to_string();
        if contact_id.is_empty() {
            return WebhookOutcome::error("missing contact_id");
        }

        // 1. Global budget
        let decision = self.limiter.check(WEBHOOK_SCOPE, self.config.webhook_rpm).await;
        if !decision.allowed {
            info!(contact_id = %contact_id, "Webhook rate limit exceeded");
            return WebhookOutcome::Throttled {
                reason: ThrottleReason::RateLimit,
            };
        }

        // 2. Redelivery check; the marker is created before any work starts
        let dedup_key = keys::dedup(&contact_id, &event.message);
        if !self.cache.set_if_absent(&dedup_key, "1", self.config.dedup_ttl).await {
            debug!(contact_id = %contact_id, "Duplicate message skipped");
            return WebhookOutcome::Skipped {
                reason: SkipReason::Duplicate,
            };
        }

        // 3. One dispatch per contact at a time
        let Some(lock) = ProcessingLock::acquire(&self.cache, &contact_id, &self.config.lock).await
        else {
            // Nothing ran; let the sender's retry through
            self.cache.delete(&dedup_key).await;
            info!(contact_id = %contact_id, "Contact busy, throttling");
            return WebhookOutcome::Throttled {
                reason: ThrottleReason::ProcessingLock,
            };
        };

        let outcome = match AssertUnwindSafe(self.dispatch(&contact_id, &event))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(contact_id = %contact_id, error = %e, "Webhook dispatch failed");
                WebhookOutcome::error(e.to_string())
            }
            Err(_) => {
                error!(contact_id = %contact_id, "Webhook dispatch panicked");
                WebhookOutcome::error("internal error during dispatch")
            }
        };

        if !lock.release(&self.cache).await {
            warn!(contact_id = %contact_id, "Processing lock release incomplete; TTL will expire it");
        }

        outcome
    }

    /// Steps 4-7, run while holding the contact lock
    async fn dispatch(
        &self,
        contact_id: &str,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, CollaboratorError> {
        let hint = event.bot_type.as_deref().and_then(|raw| match raw.parse::<BotType>() {
            Ok(bot) => Some(bot),
            Err(e) => {
                warn!(contact_id, error = %e, "Ignoring bot type hint");
                None
            }
        });

        let router = BotRouter {
            cache: &self.cache,
            crm: self.crm.as_ref(),
            tracker: &self.tracker,
            default_bot: self.config.default_bot,
            ttl: self.config.assignment_ttl,
        };
        let bot_type = router.resolve(contact_id, hint).await;

        let engine = self
            .engines
            .get(bot_type)
            .ok_or(CollaboratorError::NoEngine(bot_type))?;

        let request = BotRequest {
            contact_id: contact_id.to_string(),
            location_id: event.location_id.clone(),
            message: event.message.clone(),
            contact: event.contact.clone(),
        };

        let timer = LatencyTimer::start("bot_engine");
        let result = engine.respond(&request).await;
        let shortcut = result.as_ref().is_ok_and(|r| r.pattern_shortcut);
        self.tracker
            .record_ai_call(timer.finish(), result.is_ok(), shortcut);
        let reply = result?;

        tracked_crm_call(
            &self.tracker,
            "crm_send_message",
            self.crm
                .send_message(contact_id, &event.location_id, &reply.message),
        )
        .await?;

        let (tag_actions, field_actions): (Vec<CrmAction>, Vec<CrmAction>) =
            reply.actions.into_iter().partition(CrmAction::is_tag_mutation);

        for action in &field_actions {
            let applied = tracked_crm_call(
                &self.tracker,
                "crm_update_field",
                self.crm.apply_action(contact_id, action),
            )
            .await;
            if let Err(e) = applied {
                warn!(contact_id, error = %e, "Field update failed after reply");
            }
        }

        let deferred_actions = tag_actions.len();
        if deferred_actions > 0 {
            self.schedule_tag_actions(contact_id, tag_actions);
        }

        info!(
            contact_id,
            bot = %bot_type,
            engine = engine.name(),
            temperature = %reply.temperature,
            deferred_actions,
            "Webhook processed"
        );

        Ok(WebhookOutcome::Processed {
            contact_id: contact_id.to_string(),
            bot_type,
            temperature: reply.temperature,
            reply: reply.message,
            deferred_actions,
        })
    }

    /// Apply tag changes after the configured delay, once the reply has
    /// reached the contact
    fn schedule_tag_actions(&self, contact_id: &str, actions: Vec<CrmAction>) {
        let crm = self.crm.clone();
        let tracker = self.tracker.clone();
        let contact_id = contact_id.to_string();

        self.deferred
            .schedule("crm_tag_actions", self.config.tag_delay, async move {
                let mut failed = 0;
                for action in &actions {
                    let applied = tracked_crm_call(
                        &tracker,
                        "crm_apply_tag",
                        crm.apply_action(&contact_id, action),
                    )
                    .await;
                    if let Err(e) = applied {
                        warn!(contact_id = %contact_id, error = %e, "Tag action failed");
                        failed += 1;
                    }
                }

                if failed == 0 {
                    Ok(())
                } else {
                    Err(format!(
                        "{} of {} tag actions failed for {}",
                        failed,
                        actions.len(),
                        contact_id
                    ))
                }
            });
    }
}
