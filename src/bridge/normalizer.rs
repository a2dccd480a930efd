//! Inbound event normalization.
//!
//! Drains the single active inbound pump (webhook receiver or session event
//! stream), filters echoes, foreign teams and reaction updates, and turns
//! what is left into [`CanonicalMessage`]s for the gateway. File and avatar
//! downloads run inline in this task, so they are serialized.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::action;
use super::avatar::{AvatarCache, MediaGuard};
use crate::config::BridgeConfig;
use crate::mattermost::events::{Post, SessionEvent, SessionEventKind};
use crate::mattermost::MattermostApi;
use crate::types::{
    CanonicalMessage, EventKind, Extra, FileAttachment, OversizeFile, SYSTEM_USERNAME,
};
use crate::webhook::HookMessage;

/// Post types that announce a channel join or leave.
const JOIN_LEAVE_TYPES: [&str; 3] = [
    "system_join_leave",
    "system_join_channel",
    "system_leave_channel",
];

/// Text of avatar side-channel events.
const AVATAR_TEXT: &str = "avatar";

/// A raw vendor event from either inbound pump.
#[derive(Debug, Clone)]
pub enum RawEvent {
    /// From the session websocket stream.
    Session(SessionEvent),
    /// From the outgoing-webhook receiver.
    Hook(HookMessage),
}

impl From<SessionEvent> for RawEvent {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}

impl From<HookMessage> for RawEvent {
    fn from(message: HookMessage) -> Self {
        Self::Hook(message)
    }
}

/// Configuration the normalizer consults.
#[derive(Debug, Clone, Default)]
pub struct NormalizerSettings {
    /// Appended to the text of relayed edits.
    pub edit_suffix: String,
    /// Drop edits entirely.
    pub edit_disable: bool,
    /// Media server upload destination; avatars are fetched only when set.
    pub media_server_upload: Option<String>,
    /// Media server download base, used for avatar URLs.
    pub media_server_download: Option<String>,
}

impl NormalizerSettings {
    /// Pick the normalizer settings out of the adapter configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            edit_suffix: config.mattermost.edit_suffix.clone(),
            edit_disable: config.mattermost.edit_disable,
            media_server_upload: config.general.media_server_upload().map(str::to_owned),
            media_server_download: config.general.media_server_download().map(str::to_owned),
        }
    }
}

/// Turns raw vendor events into canonical messages.
pub struct EventNormalizer {
    session: Option<Arc<dyn MattermostApi>>,
    avatars: Arc<AvatarCache>,
    guard: MediaGuard,
    settings: NormalizerSettings,
}

impl EventNormalizer {
    /// Create a normalizer. `session` is `None` on webhook-only plans.
    pub fn new(
        session: Option<Arc<dyn MattermostApi>>,
        avatars: Arc<AvatarCache>,
        guard: MediaGuard,
        settings: NormalizerSettings,
    ) -> Self {
        Self {
            session,
            avatars,
            guard,
            settings,
        }
    }

    /// Normalize one event into zero or more canonical messages, in the
    /// order they must reach the gateway.
    pub async fn normalize(&self, event: RawEvent) -> Vec<CanonicalMessage> {
        match event {
            RawEvent::Session(event) => self.normalize_session(event).await,
            RawEvent::Hook(message) => self.normalize_hook(message).into_iter().collect(),
        }
    }

    /// Drain `events` until either side closes.
    pub async fn run<E>(self, mut events: mpsc::Receiver<E>, gateway: mpsc::Sender<CanonicalMessage>)
    where
        E: Into<RawEvent> + Send,
    {
        info!("event normalizer started");
        while let Some(raw) = events.recv().await {
            for message in self.normalize(raw.into()).await {
                if gateway.send(message).await.is_err() {
                    info!("gateway channel closed, stopping event normalizer");
                    return;
                }
            }
        }
        info!("inbound pump closed, stopping event normalizer");
    }

    /// Run on a background task.
    pub fn spawn<E>(
        self,
        events: mpsc::Receiver<E>,
        gateway: mpsc::Sender<CanonicalMessage>,
    ) -> tokio::task::JoinHandle<()>
    where
        E: Into<RawEvent> + Send + 'static,
    {
        tokio::spawn(self.run(events, gateway))
    }

    async fn normalize_session(&self, event: SessionEvent) -> Vec<CanonicalMessage> {
        let Some(api) = self.session.as_deref() else {
            debug!("session event without a session, dropping");
            return Vec::new();
        };
        let session = api.session();
        let SessionEvent {
            kind,
            post,
            team_id,
            channel_name,
            sender_name,
        } = event;

        if kind == SessionEventKind::PostEdited && self.settings.edit_disable {
            debug!(post_id = %post.id, "edits disabled, dropping edit");
            return Vec::new();
        }

        if post.props.from_bridge {
            debug!(post_id = %post.id, "relayed post, dropping");
            return Vec::new();
        }

        let lookup = if team_id.is_empty() || channel_name.is_empty() {
            match api.channel_info(&post.channel_id).await {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(error = %e, channel_id = %post.channel_id, "channel lookup failed");
                    None
                }
            }
        } else {
            None
        };

        let team = if team_id.is_empty() {
            lookup.as_ref().map(|c| c.team_id.clone()).unwrap_or_default()
        } else {
            team_id
        };
        if team != session.team_id {
            debug!(post_id = %post.id, team = %team, "post outside our team, dropping");
            return Vec::new();
        }

        let channel = if channel_name.is_empty() {
            match lookup {
                Some(info) => info.name,
                None => return Vec::new(),
            }
        } else {
            channel_name
        };

        if JOIN_LEAVE_TYPES.contains(&post.post_type.as_str()) {
            debug!(channel = %channel, post_type = %post.post_type, "join/leave event");
            return vec![CanonicalMessage::join_leave(channel, post.message)];
        }

        // Own join/leave notices were relayed above; own REST posts carry no marker.
        if post.user_id == session.user_id {
            debug!(post_id = %post.id, "own post, dropping");
            return Vec::new();
        }

        // Known limitation: a new post that already has reactions looks the
        // same as a relayed post that gained one. Both are dropped.
        if post.has_reactions && kind != SessionEventKind::PostDeleted {
            debug!(post_id = %post.id, "post carries reactions, dropping");
            return Vec::new();
        }

        if kind == SessionEventKind::PostDeleted {
            return vec![CanonicalMessage::delete(channel, post.id)];
        }

        let username = author_name(api, &post, &sender_name).await;
        let mut out = Vec::new();

        if let Some(avatar) = self.fetch_avatar(api, &post.user_id, &channel).await {
            out.push(avatar);
        }

        let mut text = post.message.clone();
        if kind == SessionEventKind::PostEdited {
            text.push_str(&self.settings.edit_suffix);
        }
        let mut message = CanonicalMessage::new(&channel, &username, &post.user_id, text);
        message.id = post.id.clone();
        message.avatar = self.avatar_url(&post.user_id);
        if !post.props.attachments.is_empty() {
            message.extra.push(Extra::Attachments {
                items: post.props.attachments.clone(),
            });
        }

        for file_id in &post.file_ids {
            let meta = match api.file_metadata(file_id).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(error = %e, file_id = %file_id, "file metadata lookup failed, skipping file");
                    continue;
                }
            };

            if !self.guard.check_size(meta.size) {
                warn!(
                    file = %meta.name,
                    size = meta.size,
                    max = self.guard.max_bytes(),
                    "file too large to download"
                );
                let mut notice = CanonicalMessage::new(&channel, &username, &post.user_id, "");
                notice.kind = EventKind::FileTooLarge;
                notice.avatar = message.avatar.clone();
                notice.extra.push(Extra::FileTooLarge(OversizeFile {
                    name: meta.name,
                    size: meta.size,
                    comment: post.message.clone(),
                }));
                out.push(notice);
                continue;
            }

            let data = match api.download_file(file_id).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, file = %meta.name, "file download failed, skipping file");
                    continue;
                }
            };
            debug!(file = %meta.name, size = meta.size, "file downloaded");
            message.extra.push(Extra::File(FileAttachment {
                name: meta.name,
                data,
                size: meta.size,
                url: api.file_link(file_id).await.ok(),
                comment: Some(post.message.clone()),
                content_hash: None,
                is_avatar: false,
            }));
        }

        apply_action(&mut message);
        if message.text.is_empty() && message.extra.is_empty() {
            debug!(post_id = %post.id, "nothing left to relay");
        } else {
            out.push(message);
        }
        out
    }

    fn normalize_hook(&self, hook: HookMessage) -> Option<CanonicalMessage> {
        if let Some(api) = self.session.as_deref() {
            let session = api.session();
            if !hook.user_id.is_empty() && hook.user_id == session.user_id {
                debug!(post_id = %hook.post_id, "own webhook delivery, dropping");
                return None;
            }
            if !hook.team_id.is_empty() && hook.team_id != session.team_id {
                debug!(post_id = %hook.post_id, team = %hook.team_id, "webhook delivery outside our team, dropping");
                return None;
            }
        }

        if hook.text.is_empty() {
            return None;
        }

        let mut message =
            CanonicalMessage::new(hook.channel_name, hook.user_name, hook.user_id, hook.text);
        message.id = hook.post_id;
        message.avatar = self.avatar_url(&message.user_id);
        apply_action(&mut message);
        Some(message)
    }

    /// Fetch the author's avatar if it is not cached yet.
    ///
    /// Failures and oversize avatars are logged and produce nothing.
    async fn fetch_avatar(
        &self,
        api: &dyn MattermostApi,
        user_id: &str,
        channel: &str,
    ) -> Option<CanonicalMessage> {
        self.settings.media_server_upload.as_ref()?;
        if user_id.is_empty() || !self.avatars.should_fetch(user_id) {
            return None;
        }

        let data = match api.profile_image(user_id).await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, user_id, "avatar download failed");
                return None;
            }
        };
        let size = u64::try_from(data.len()).unwrap_or(u64::MAX);
        if !self.guard.check_size(size) {
            warn!(user_id, size, max = self.guard.max_bytes(), "avatar too large, skipping");
            return None;
        }

        debug!(user_id, size, "avatar downloaded");
        let mut message = CanonicalMessage::new(channel, SYSTEM_USERNAME, user_id, AVATAR_TEXT);
        message.kind = EventKind::AvatarDownload;
        message.extra.push(Extra::File(FileAttachment {
            name: format!("{user_id}.png"),
            data,
            size,
            url: None,
            comment: None,
            content_hash: None,
            is_avatar: true,
        }));
        Some(message)
    }

    fn avatar_url(&self, user_id: &str) -> Option<String> {
        let base = self.settings.media_server_download.as_deref()?;
        self.avatars.avatar_url(user_id, base)
    }
}

/// Display name: `override_username`, then the envelope's sender name, then
/// a user lookup. Falls back to the user id.
async fn author_name(api: &dyn MattermostApi, post: &Post, sender_name: &str) -> String {
    if let Some(name) = &post.props.override_username {
        return name.clone();
    }
    let sender = sender_name.trim_start_matches('@');
    if !sender.is_empty() {
        return sender.to_owned();
    }
    match api.user_name(&post.user_id).await {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, user_id = %post.user_id, "user lookup failed");
            post.user_id.clone()
        }
    }
}

fn apply_action(message: &mut CanonicalMessage) {
    if message.kind != EventKind::Normal {
        return;
    }
    if let Some(text) = action::decode(&message.text) {
        message.text = text;
        message.kind = EventKind::UserAction;
    }
}
