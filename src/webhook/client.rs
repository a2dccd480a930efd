//! Incoming-webhook sender.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{HookPayload, WebhookError, WebhookSink};

/// HTTP connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Error bodies are cut to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Posts [`HookPayload`]s to a Mattermost incoming-webhook URL.
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
}

impl WebhookClient {
    /// Create a client for `url`, optionally accepting invalid certificates.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Http`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, skip_tls_verify: bool) -> Result<Self, WebhookError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(skip_tls_verify)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl std::fmt::Debug for WebhookClient {
    // The URL path is the webhook secret.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookClient")
            .field("url", &"__REDACTED__")
            .finish()
    }
}

#[async_trait]
impl WebhookSink for WebhookClient {
    async fn send(&self, payload: &HookPayload) -> Result<(), WebhookError> {
        let resp = self.http.post(&self.url).json(payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY_CHARS)
                .collect();
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(channel = %payload.channel, "webhook payload delivered");
        Ok(())
    }
}
