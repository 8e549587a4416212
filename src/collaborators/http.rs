//! HTTP adapters for the bot engines and the CRM

use super::{BotEngine, BotReply, BotRequest, BotType, CollaboratorError, CrmAction, CrmClient};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const CRM_API_VERSION: &str = "2021-07-28";

fn build_client(timeout: Duration) -> Result<reqwest::Client, CollaboratorError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CollaboratorError::Request(e.to_string()))
}

/// Turn a non-2xx response into a status error
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(CollaboratorError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Bot engine reached over HTTP: POSTs the request and expects a `BotReply`
pub struct HttpBotEngine {
    client: reqwest::Client,
    url: String,
    name: String,
}

impl HttpBotEngine {
    pub fn new(
        bot_type: BotType,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            name: format!("{}-bot", bot_type),
        })
    }
}

#[async_trait]
impl BotEngine for HttpBotEngine {
    async fn respond(&self, request: &BotRequest) -> Result<BotReply, CollaboratorError> {
        let response = self.client.post(&self.url).json(request).send().await?;
        let reply = check_status(response).await?.json::<BotReply>().await?;
        Ok(reply)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct ContactEnvelope {
    contact: ContactTags,
}

#[derive(Debug, Default, Deserialize)]
struct ContactTags {
    #[serde(default)]
    tags: Vec<String>,
}

/// CRM REST client (contacts and conversations API)
pub struct HttpCrmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCrmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("Version", CRM_API_VERSION)
    }
}

/// `/contacts/{id}` plus `suffix`. Ids come straight from webhook bodies, so
/// anything beyond a plain identifier is refused rather than spliced into
/// an authenticated URL.
fn contact_path(contact_id: &str, suffix: &str) -> Result<String, CollaboratorError> {
    let plain = !contact_id.is_empty()
        && contact_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !plain {
        return Err(CollaboratorError::InvalidContactId(contact_id.to_string()));
    }
    Ok(format!("/contacts/{}{}", contact_id, suffix))
}

/// Outbound SMS body; the conversations API scopes messages by location
fn message_payload(contact_id: &str, location_id: &str, message: &str) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "type": "SMS",
        "contactId": contact_id,
        "message": message,
    });
    if !location_id.is_empty() {
        payload["locationId"] = serde_json::Value::from(location_id);
    }
    payload
}

/// First tag on the contact that maps to a bot type
fn routing_tag_from(tags: Vec<String>) -> Option<String> {
    tags.into_iter()
        .find(|tag| BotType::from_routing_tag(tag).is_some())
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn routing_tag(&self, contact_id: &str) -> Result<Option<String>, CollaboratorError> {
        let response = self
            .request(reqwest::Method::GET, &contact_path(contact_id, "")?)
            .send()
            .await?;
        let envelope = check_status(response)
            .await?
            .json::<ContactEnvelope>()
            .await?;
        Ok(routing_tag_from(envelope.contact.tags))
    }

    async fn send_message(
        &self,
        contact_id: &str,
        location_id: &str,
        message: &str,
    ) -> Result<(), CollaboratorError> {
        let payload = message_payload(contact_id, location_id, message);
        let response = self
            .request(reqwest::Method::POST, "/conversations/messages")
            .json(&payload)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn apply_action(
        &self,
        contact_id: &str,
        action: &CrmAction,
    ) -> Result<(), CollaboratorError> {
        let tags_path = contact_path(contact_id, "/tags")?;
        let request = match action {
            CrmAction::AddTag { tag } => self
                .request(reqwest::Method::POST, &tags_path)
                .json(&serde_json::json!({ "tags": [tag] })),
            CrmAction::RemoveTag { tag } => self
                .request(reqwest::Method::DELETE, &tags_path)
                .json(&serde_json::json!({ "tags": [tag] })),
            CrmAction::UpdateField { field, value } => self
                .request(reqwest::Method::PUT, &contact_path(contact_id, "")?)
                .json(&serde_json::json!({
                    "customFields": [{ "key": field, "field_value": value }]
                })),
        };

        check_status(request.send().await?).await?;
        Ok(())
    }
}
