//! Sticky bot assignment

use crate::cache::{keys, CacheStore};
use crate::collaborators::{BotType, CrmClient};
use crate::performance::{LatencyTimer, PerformanceTracker};
use std::time::Duration;
use tracing::{debug, warn};

/// Resolves which bot handles a contact and keeps that choice sticky
pub struct BotRouter<'a> {
    pub cache: &'a CacheStore,
    pub crm: &'a dyn CrmClient,
    pub tracker: &'a PerformanceTracker,
    pub default_bot: BotType,
    pub ttl: Duration,
}

impl BotRouter<'_> {
    /// Explicit hint wins and overwrites the assignment; otherwise reuse the
    /// stored assignment; otherwise ask the CRM for a routing tag, falling
    /// back to the default bot.
    pub async fn resolve(&self, contact_id: &str, hint: Option<BotType>) -> BotType {
        let key = keys::assignment(contact_id);

        if let Some(bot) = hint {
            self.cache.set(&key, bot.as_str(), self.ttl).await;
            debug!(contact_id, bot = %bot, "Bot assignment set from hint");
            return bot;
        }

        if let Some(stored) = self.cache.get(&key).await {
            match stored.parse::<BotType>() {
                Ok(bot) => return bot,
                Err(e) => warn!(contact_id, error = %e, "Ignoring corrupt bot assignment"),
            }
        }

        let bot = self.lookup_routing_tag(contact_id).await;
        self.cache.set(&key, bot.as_str(), self.ttl).await;
        debug!(contact_id, bot = %bot, "Bot assignment created");
        bot
    }

    async fn lookup_routing_tag(&self, contact_id: &str) -> BotType {
        let timer = LatencyTimer::start("crm_routing_tag");
        let result = self.crm.routing_tag(contact_id).await;
        self.tracker.record_crm_call(timer.finish(), result.is_ok());

        match result {
            Ok(Some(tag)) => BotType::from_routing_tag(&tag).unwrap_or(self.default_bot),
            Ok(None) => self.default_bot,
            Err(e) => {
                warn!(contact_id, error = %e, "Routing tag lookup failed, using default bot");
                self.default_bot
            }
        }
    }
}
