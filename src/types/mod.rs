//! Canonical message model exchanged with the relay gateway.
//!
//! Every adapter in the relay speaks [`CanonicalMessage`]. The [`EventKind`]
//! decides which [`Extra`] side-payloads are meaningful: deletes carry only
//! an id, oversize notices carry metadata but never bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Username used for synthetic, adapter-authored events.
pub const SYSTEM_USERNAME: &str = "system";

/// What a canonical message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Ordinary chat text.
    #[default]
    Normal,
    /// Emote-style message (`/me waves`).
    UserAction,
    /// Removal of a previously relayed message, identified by id.
    MessageDelete,
    /// Avatar bytes for the media server; never shown to users.
    AvatarDownload,
    /// A file was too large to fetch; metadata only.
    FileTooLarge,
    /// Somebody joined or left a channel.
    JoinLeave,
}

/// A file carried alongside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    /// File name, including extension.
    pub name: String,
    /// Raw file contents (base64 in JSON).
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Size in bytes as reported by the backend.
    pub size: u64,
    /// Public URL, set once the file has been uploaded somewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Caption that accompanied the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Content hash reported by the media server after upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Whether this file is a user avatar.
    #[serde(default)]
    pub is_avatar: bool,
}

/// Metadata of a file that exceeded the download ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OversizeFile {
    /// File name.
    pub name: String,
    /// Reported size in bytes.
    pub size: u64,
    /// Caption of the post the file belonged to.
    #[serde(default)]
    pub comment: String,
}

/// Typed side-payload of a canonical message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Extra {
    /// A fetched file with its bytes.
    File(FileAttachment),
    /// A file that was not fetched because of its size.
    FileTooLarge(OversizeFile),
    /// Vendor attachment metadata passed through untouched.
    Attachments {
        /// Raw attachment objects.
        items: Vec<serde_json::Value>,
    },
}

/// Adapter-agnostic message record exchanged with the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Message body.
    #[serde(default)]
    pub text: String,
    /// Channel name.
    pub channel: String,
    /// Display name of the author.
    #[serde(default)]
    pub username: String,
    /// Backend user id of the author.
    #[serde(default)]
    pub user_id: String,
    /// Backend message id; empty when not yet posted.
    #[serde(default)]
    pub id: String,
    /// Event classification.
    #[serde(default)]
    pub kind: EventKind,
    /// Avatar URL of the author, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Ordered side-payloads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<Extra>,
    /// When the adapter produced or received the message.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl CanonicalMessage {
    /// A normal text message.
    pub fn new(
        channel: impl Into<String>,
        username: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            channel: channel.into(),
            username: username.into(),
            user_id: user_id.into(),
            id: String::new(),
            kind: EventKind::Normal,
            avatar: None,
            extra: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// A delete event. Carries the id and channel only.
    pub fn delete(channel: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: EventKind::MessageDelete,
            ..Self::new(channel, "", "", "")
        }
    }

    /// A join/leave notice authored by the system user.
    pub fn join_leave(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::JoinLeave,
            ..Self::new(channel, SYSTEM_USERNAME, "", text)
        }
    }

    /// Files with bytes attached to this message, in order.
    pub fn files(&self) -> impl Iterator<Item = &FileAttachment> {
        self.extra.iter().filter_map(|e| match e {
            Extra::File(f) => Some(f),
            _ => None,
        })
    }

    /// Oversize-file notices attached to this message, in order.
    pub fn oversize_files(&self) -> impl Iterator<Item = &OversizeFile> {
        self.extra.iter().filter_map(|e| match e {
            Extra::FileTooLarge(f) => Some(f),
            _ => None,
        })
    }
}

/// Serde adapter encoding byte buffers as standard base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
