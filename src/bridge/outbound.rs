//! Outbound translation: canonical messages to vendor calls.
//!
//! What a message turns into depends on the sink chosen by the plan. The
//! webhook sink can only post: deletes are accepted and ignored, messages
//! with an id are posted as new messages, and files are reduced to their
//! URLs. The session sink edits, deletes and uploads natively.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use super::{action, AvatarCache, BridgeError, BRIDGE_ORIGIN_PROP};
use crate::config::BridgeConfig;
use crate::mattermost::MattermostApi;
use crate::types::{CanonicalMessage, EventKind, OversizeFile, SYSTEM_USERNAME};
use crate::webhook::{HookPayload, WebhookSink};

/// Username prefix of oversize-file notices posted through the session.
const NOTICE_PREFIX: &str = "<system> ";

/// Where outbound calls go.
#[derive(Clone)]
pub enum Sink {
    /// Receive-only plan.
    None,
    /// Incoming-webhook sender.
    Webhook(Arc<dyn WebhookSink>),
    /// REST API of the logged-in session.
    Session(Arc<dyn MattermostApi>),
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Webhook(_) => f.write_str("Webhook"),
            Self::Session(_) => f.write_str("Session"),
        }
    }
}

/// Configuration the translator consults.
#[derive(Debug, Clone, Default)]
pub struct OutboundSettings {
    /// Prefix outgoing text with the sender's display name.
    pub prefix_messages_with_nick: bool,
    /// Webhook icon when the message has no avatar.
    pub icon_url: Option<String>,
    /// Download ceiling quoted in oversize notices.
    pub media_download_size: u64,
}

impl OutboundSettings {
    /// Pick the outbound settings out of the adapter configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            prefix_messages_with_nick: config.mattermost.prefix_messages_with_nick,
            icon_url: config.mattermost.icon_url().map(str::to_owned),
            media_download_size: config.general.media_download_size,
        }
    }
}

/// Sends canonical messages through the plan's sink.
#[derive(Debug)]
pub struct OutboundTranslator {
    sink: Sink,
    avatars: Arc<AvatarCache>,
    settings: OutboundSettings,
}

impl OutboundTranslator {
    /// Create a translator.
    pub fn new(sink: Sink, avatars: Arc<AvatarCache>, settings: OutboundSettings) -> Self {
        Self {
            sink,
            avatars,
            settings,
        }
    }

    /// Deliver one canonical message, returning the remote message id.
    ///
    /// The id is empty when nothing was posted or the sink cannot report
    /// one (webhooks).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ReceiveOnly`] when the plan has no sink, and
    /// the collaborator's error when a post, edit, delete or upload fails.
    /// Nothing is retried.
    pub async fn send(&self, message: CanonicalMessage) -> Result<String, BridgeError> {
        if message.kind == EventKind::AvatarDownload {
            self.confirm_avatar(&message);
            return Ok(String::new());
        }

        let mut message = message;
        if message.kind == EventKind::UserAction {
            message.text = action::encode(&message.text);
        }
        if self.settings.prefix_messages_with_nick && !message.text.is_empty() {
            message.text = format!("{}{}", message.username, message.text);
        }

        let result = match &self.sink {
            Sink::None => Err(BridgeError::ReceiveOnly),
            Sink::Webhook(hook) => self.send_webhook(hook.as_ref(), &message).await,
            Sink::Session(api) => self.send_session(api.as_ref(), &message).await,
        };
        if let Err(e) = &result {
            error!(error = %e, channel = %message.channel, kind = ?message.kind, "send failed");
        }
        result
    }

    fn confirm_avatar(&self, message: &CanonicalMessage) {
        for file in message.files() {
            if let Some(hash) = file.content_hash.as_deref().filter(|h| !h.is_empty()) {
                debug!(user_id = %message.user_id, hash, "avatar upload confirmed");
                self.avatars.confirm_upload(&message.user_id, hash);
            }
        }
    }

    fn notice_text(&self, file: &OversizeFile) -> String {
        format!(
            "file {} too big to download ({} > allowed size: {})",
            file.name, file.size, self.settings.media_download_size
        )
    }

    fn webhook_payload(
        &self,
        channel: &str,
        username: &str,
        icon: Option<&str>,
        text: String,
    ) -> HookPayload {
        let mut props = serde_json::Map::new();
        props.insert(BRIDGE_ORIGIN_PROP.to_owned(), Value::Bool(true));
        HookPayload {
            channel: channel.to_owned(),
            username: username.to_owned(),
            icon_url: icon.or(self.settings.icon_url.as_deref()).map(str::to_owned),
            text,
            props,
        }
    }

    async fn send_webhook(
        &self,
        hook: &dyn WebhookSink,
        message: &CanonicalMessage,
    ) -> Result<String, BridgeError> {
        // Incoming webhooks have no delete or edit verb.
        if message.kind == EventKind::MessageDelete {
            debug!(id = %message.id, "webhook sink cannot delete, ignoring");
            return Ok(String::new());
        }

        for file in message.oversize_files() {
            let payload =
                self.webhook_payload(&message.channel, SYSTEM_USERNAME, None, self.notice_text(file));
            hook.send(&payload).await?;
        }

        let mut text = message.text.clone();
        for url in message.files().filter_map(|f| f.url.as_deref()) {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(url);
        }
        if text.is_empty() {
            return Ok(String::new());
        }

        let payload = self.webhook_payload(
            &message.channel,
            &message.username,
            message.avatar.as_deref(),
            text,
        );
        hook.send(&payload).await?;
        debug!(channel = %message.channel, "message sent via webhook");
        Ok(String::new())
    }

    async fn send_session(
        &self,
        api: &dyn MattermostApi,
        message: &CanonicalMessage,
    ) -> Result<String, BridgeError> {
        if message.kind == EventKind::MessageDelete {
            if message.id.is_empty() {
                return Ok(String::new());
            }
            api.delete(&message.id).await?;
            return Ok(message.id.clone());
        }

        let notices: Vec<String> = message
            .oversize_files()
            .map(|f| format!("{NOTICE_PREFIX}{}", self.notice_text(f)))
            .collect();
        if !notices.is_empty() {
            let channel_id = api.resolve_channel_id(&message.channel).await?;
            for notice in &notices {
                api.post(&channel_id, notice).await?;
            }
        }

        if message.files().next().is_some() {
            let channel_id = api.resolve_channel_id(&message.channel).await?;
            let mut last_id = String::new();
            for file in message.files() {
                // No caption is posted unless the upload succeeded.
                let file_id = api.upload_file(&file.data, &channel_id, &file.name).await?;
                let caption = match &file.comment {
                    Some(comment) if self.settings.prefix_messages_with_nick => {
                        format!("{}{comment}", message.username)
                    }
                    Some(comment) => comment.clone(),
                    None => message.text.clone(),
                };
                last_id = api
                    .post_with_files(&channel_id, &caption, std::slice::from_ref(&file_id))
                    .await?;
            }
            return Ok(last_id);
        }

        if !message.id.is_empty() {
            return Ok(api.edit(&message.id, &message.text).await?);
        }

        if message.text.is_empty() {
            return Ok(String::new());
        }

        let channel_id = api.resolve_channel_id(&message.channel).await?;
        Ok(api.post(&channel_id, &message.text).await?)
    }
}
