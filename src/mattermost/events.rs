//! Websocket event stream for a logged-in Mattermost session.
//!
//! Connects to `/api/v4/websocket`, answers the authentication challenge,
//! and forwards post lifecycle events to the normalizer via an mpsc channel.
//! Reconnects with exponential backoff until the receiver is dropped.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tracing::{debug, info, warn};

use super::ApiError;

/// Post property marking a post as relayed by this bridge.
pub const BRIDGE_ORIGIN_PROP: &str = "matterbridge";

/// Initial reconnect backoff (milliseconds).
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Post lifecycle events the adapter cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    /// `posted`
    Posted,
    /// `post_edited`
    PostEdited,
    /// `post_deleted`
    PostDeleted,
}

/// One post event from the session stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Event type.
    pub kind: SessionEventKind,
    /// The post the event is about.
    pub post: Post,
    /// Team id from the event envelope; empty for direct messages.
    pub team_id: String,
    /// Channel name from the event envelope, when present.
    pub channel_name: String,
    /// Sender display name (`@alice`), when present.
    pub sender_name: String,
}

/// The subset of a Mattermost post used by the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Post {
    /// Post id.
    pub id: String,
    /// Author user id.
    pub user_id: String,
    /// Channel id.
    pub channel_id: String,
    /// Text body.
    pub message: String,
    /// Post type; empty for ordinary posts, `system_*` for system messages.
    #[serde(rename = "type")]
    pub post_type: String,
    /// Interpreted post properties.
    pub props: PostProps,
    /// Ids of files attached to the post.
    #[serde(deserialize_with = "null_as_default")]
    pub file_ids: Vec<String>,
    /// Whether the event reflects a reaction change.
    pub has_reactions: bool,
}

/// Post properties the adapter interprets.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub struct PostProps {
    /// The post carries the bridge-origin marker.
    pub from_bridge: bool,
    /// Display name override set by webhooks and integrations.
    pub override_username: Option<String>,
    /// Raw message attachments.
    pub attachments: Vec<Value>,
}

impl PostProps {
    /// Interpret a raw `props` object.
    pub fn from_value(props: &Value) -> Self {
        Self {
            from_bridge: matches!(props.get(BRIDGE_ORIGIN_PROP), Some(Value::Bool(_))),
            override_username: props
                .get("override_username")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
            attachments: props
                .get("attachments")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

impl From<Value> for PostProps {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
struct Frame {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    broadcast: Value,
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default()
}

/// Parse one websocket text frame.
///
/// Returns `None` for frames that are not post events (hellos, typing,
/// status changes, replies to our own requests) or that fail to parse.
/// The `post` field may be either a JSON-encoded string or an object.
pub fn parse_event(raw: &str) -> Option<SessionEvent> {
    let frame: Frame = serde_json::from_str(raw).ok()?;
    let kind = match frame.event.as_deref()? {
        "posted" => SessionEventKind::Posted,
        "post_edited" => SessionEventKind::PostEdited,
        "post_deleted" => SessionEventKind::PostDeleted,
        _ => return None,
    };

    let post: Post = match frame.data.get("post")? {
        Value::String(encoded) => serde_json::from_str(encoded).ok()?,
        other => serde_json::from_value(other.clone()).ok()?,
    };

    let mut team_id = str_field(&frame.data, "team_id");
    if team_id.is_empty() {
        team_id = str_field(&frame.broadcast, "team_id");
    }

    Some(SessionEvent {
        kind,
        post,
        team_id,
        channel_name: str_field(&frame.data, "channel_name"),
        sender_name: str_field(&frame.data, "sender_name"),
    })
}

/// Connection settings for the websocket stream.
#[derive(Clone)]
pub struct StreamConfig {
    /// `wss://host/api/v4/websocket`
    pub url: String,
    /// Session or personal access token.
    pub token: String,
    /// Accept invalid TLS certificates.
    pub skip_tls_verify: bool,
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("url", &self.url)
            .field("token", &"__REDACTED__")
            .field("skip_tls_verify", &self.skip_tls_verify)
            .finish()
    }
}

/// Spawn the event stream, forwarding parsed events to `event_tx`.
///
/// Returns immediately. The task stops once `event_tx`'s receiver is gone.
pub fn spawn_event_stream(
    config: StreamConfig,
    event_tx: mpsc::Sender<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            info!(url = %config.url, "connecting to Mattermost event stream");

            match stream_events(&config, &event_tx).await {
                Ok(()) => {
                    info!("Mattermost event stream receiver closed, stopping");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms, "Mattermost event stream error, reconnecting");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                }
            }
        }
    })
}

fn ws_err(e: impl std::fmt::Display) -> ApiError {
    ApiError::WebSocket(e.to_string())
}

/// Run one websocket connection. `Ok` means the receiver went away.
async fn stream_events(
    config: &StreamConfig,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> Result<(), ApiError> {
    let connector = if config.skip_tls_verify {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(ws_err)?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let (mut ws, _) = connect_async_tls_with_config(config.url.as_str(), None, false, connector)
        .await
        .map_err(ws_err)?;

    let auth = json!({
        "seq": 1,
        "action": "authentication_challenge",
        "data": { "token": config.token },
    });
    ws.send(Message::Text(auth.to_string().into()))
        .await
        .map_err(ws_err)?;

    while let Some(frame) = ws.next().await {
        match frame.map_err(ws_err)? {
            Message::Text(text) => {
                let Some(event) = parse_event(text.as_str()) else {
                    continue;
                };
                debug!(kind = ?event.kind, post_id = %event.post.id, "received Mattermost event");
                if event_tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Message::Ping(data) => {
                ws.send(Message::Pong(data)).await.map_err(ws_err)?;
            }
            Message::Close(frame) => {
                return Err(ApiError::WebSocket(format!("closed by server: {frame:?}")));
            }
            _ => {}
        }
    }

    Err(ApiError::WebSocket("stream ended".into()))
}
