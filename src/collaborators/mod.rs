//! Collaborator Interfaces
//!
//! The gate talks to two external systems: the qualification bot engines
//! (one per bot type) and the CRM. Both sit behind traits so the gate can be
//! exercised with in-process stubs and wired to HTTP services in production.

pub mod http;

pub use http::{HttpBotEngine, HttpCrmClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Error types for collaborator calls
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No engine configured for bot type {0}")]
    NoEngine(BotType),

    #[error("Contact id not usable in a CRM path: {0:?}")]
    InvalidContactId(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Qualification bot variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    Lead,
    Buyer,
    Seller,
}

impl BotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Buyer => "buyer",
            Self::Seller => "seller",
        }
    }

    pub fn all() -> &'static [BotType] {
        &[Self::Lead, Self::Buyer, Self::Seller]
    }

    /// Map a CRM routing tag (e.g. "Seller-Lead", "buyer_qualify") to a bot
    /// type. Seller and buyer take precedence over the generic lead tag.
    pub fn from_routing_tag(tag: &str) -> Option<Self> {
        let tag = tag.to_ascii_lowercase();
        if tag.contains("seller") {
            Some(Self::Seller)
        } else if tag.contains("buyer") {
            Some(Self::Buyer)
        } else if tag.contains("lead") {
            Some(Self::Lead)
        } else {
            None
        }
    }
}

impl fmt::Display for BotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lead" => Ok(Self::Lead),
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            other => Err(format!("unknown bot type: {}", other)),
        }
    }
}

/// Contact details forwarded from the webhook payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactMetadata {
    #[serde(alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(alias = "lastName")]
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub tags: Vec<String>,
    #[serde(alias = "customFields")]
    pub custom_fields: HashMap<String, serde_json::Value>,
}

/// Input to a bot engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRequest {
    pub contact_id: String,
    pub location_id: String,
    pub message: String,
    pub contact: ContactMetadata,
}

/// CRM mutation requested by a bot engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrmAction {
    AddTag { tag: String },
    RemoveTag { tag: String },
    UpdateField { field: String, value: serde_json::Value },
}

impl CrmAction {
    /// Tag changes trigger CRM automations and are deferred past the reply
    pub fn is_tag_mutation(&self) -> bool {
        matches!(self, Self::AddTag { .. } | Self::RemoveTag { .. })
    }
}

/// Bot engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotReply {
    pub message: String,
    /// Lead temperature / classification label (e.g. "hot", "warm", "cold")
    pub temperature: String,
    #[serde(default)]
    pub actions: Vec<CrmAction>,
    /// Reply produced by pattern matching rather than a model call
    #[serde(default)]
    pub pattern_shortcut: bool,
}

/// A qualification assistant
#[async_trait]
pub trait BotEngine: Send + Sync {
    async fn respond(&self, request: &BotRequest) -> Result<BotReply, CollaboratorError>;

    fn name(&self) -> &str;
}

/// CRM operations the gate depends on
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Previously stored routing tag for the contact, if any
    async fn routing_tag(&self, contact_id: &str) -> Result<Option<String>, CollaboratorError>;

    /// Deliver a reply to the contact
    async fn send_message(
        &self,
        contact_id: &str,
        location_id: &str,
        message: &str,
    ) -> Result<(), CollaboratorError>;

    /// Apply one requested mutation
    async fn apply_action(&self, contact_id: &str, action: &CrmAction)
        -> Result<(), CollaboratorError>;
}

/// Engines keyed by bot type
#[derive(Clone, Default)]
pub struct BotRegistry {
    engines: HashMap<BotType, Arc<dyn BotEngine>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, bot_type: BotType, engine: Arc<dyn BotEngine>) -> Self {
        self.engines.insert(bot_type, engine);
        self
    }

    pub fn get(&self, bot_type: BotType) -> Option<&Arc<dyn BotEngine>> {
        self.engines.get(&bot_type)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
