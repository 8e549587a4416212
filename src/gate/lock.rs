//! Per-contact processing lock

use crate::cache::{keys, CacheStore};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Bounded-retry acquisition policy
#[derive(Debug, Clone)]
pub struct LockPolicy {
    /// Lock expiry; bounds how long a crashed holder blocks the contact
    pub ttl: Duration,
    /// Retries after the first failed attempt
    pub attempts: u32,
    /// Wait between retries
    pub interval: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

/// A held `lock:<contact>` key. Must be passed to [`ProcessingLock::release`].
#[derive(Debug)]
pub struct ProcessingLock {
    key: String,
    token: String,
}

impl ProcessingLock {
    /// Try to take the lock, polling on the cache clock while it is held
    /// elsewhere. `None` once the attempts are exhausted.
    pub async fn acquire(cache: &CacheStore, contact_id: &str, policy: &LockPolicy) -> Option<Self> {
        let key = keys::lock(contact_id);
        let token = Uuid::new_v4().to_string();

        if cache.set_if_absent(&key, &token, policy.ttl).await {
            return Some(Self { key, token });
        }

        for attempt in 1..=policy.attempts {
            cache.clock().sleep(policy.interval).await;
            if cache.set_if_absent(&key, &token, policy.ttl).await {
                debug!(contact_id, attempt, "Processing lock acquired after waiting");
                return Some(Self { key, token });
            }
        }

        debug!(contact_id, attempts = policy.attempts, "Processing lock still held, giving up");
        None
    }

    /// Delete the lock key
    pub async fn release(self, cache: &CacheStore) -> bool {
        cache.delete(&self.key).await
    }
}
