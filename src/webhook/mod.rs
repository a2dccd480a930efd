//! Webhook collaborator: incoming-webhook sender and outgoing-webhook receiver.
//!
//! Mattermost delivers *outgoing* webhooks as form posts to our bind address
//! ([`server`]) and accepts *incoming* webhooks as JSON posts to a URL
//! ([`client`]). Neither side needs a login.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod server;

/// Errors from the webhook collaborator.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// HTTP transport failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook endpoint returned a non-success status.
    #[error("webhook returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The receiver could not bind its listen address.
    #[error("failed to bind webhook receiver: {0}")]
    Bind(#[from] std::io::Error),
}

/// Body of an incoming-webhook post.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HookPayload {
    /// Target channel name; the webhook's default channel when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel: String,
    /// Display name override.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// Icon URL override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// Text body.
    pub text: String,
    /// Post properties.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub props: serde_json::Map<String, serde_json::Value>,
}

/// Body of an outgoing-webhook delivery, as form fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HookMessage {
    /// Verification token configured on the webhook.
    pub token: String,
    /// Team id.
    pub team_id: String,
    /// Team name.
    pub team_domain: String,
    /// Channel id.
    pub channel_id: String,
    /// Channel name.
    pub channel_name: String,
    /// Author user id.
    pub user_id: String,
    /// Author username.
    pub user_name: String,
    /// Post id.
    pub post_id: String,
    /// Text body.
    pub text: String,
    /// Trigger word that matched, if any.
    pub trigger_word: String,
}

/// Anything that can deliver an incoming-webhook payload.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Post one payload.
    async fn send(&self, payload: &HookPayload) -> Result<(), WebhookError>;
}
