//! Cache key namespaces.
//!
//! All coordination state lives under one of five prefixes: `rate:`,
//! `dedup:`, `lock:`, `assigned_bot:`, `metrics:`. Extensions must keep to
//! these so instances sharing a Redis agree on key shapes.

use sha2::{Digest, Sha256};

pub const RATE_PREFIX: &str = "rate";
pub const DEDUP_PREFIX: &str = "dedup";
pub const LOCK_PREFIX: &str = "lock";
pub const ASSIGNMENT_PREFIX: &str = "assigned_bot";
pub const METRICS_PREFIX: &str = "metrics";

/// Fixed-window counter: `rate:<scope>:<minute>`
pub fn rate(scope: &str, minute: i64) -> String {
    format!("{}:{}:{}", RATE_PREFIX, scope, minute)
}

/// Dedup marker: `dedup:<contact>:<sha256(message)>`
pub fn dedup(contact_id: &str, message: &str) -> String {
    format!("{}:{}:{}", DEDUP_PREFIX, contact_id, message_hash(message))
}

/// Per-contact processing lock: `lock:<contact>`
pub fn lock(contact_id: &str) -> String {
    format!("{}:{}", LOCK_PREFIX, contact_id)
}

/// Sticky bot assignment: `assigned_bot:<contact>`
pub fn assignment(contact_id: &str) -> String {
    format!("{}:{}", ASSIGNMENT_PREFIX, contact_id)
}

/// Metrics storage: `metrics:<name>`
pub fn metrics(name: &str) -> String {
    format!("{}:{}", METRICS_PREFIX, name)
}

/// Hex SHA-256 of the raw message body.
///
/// The body is hashed as received; whitespace or case changes count as a
/// different message.
pub fn message_hash(message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}
