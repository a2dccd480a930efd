//! Mattermost session collaborator: REST client, websocket event stream,
//! and presence loop.
//!
//! The bridge core only talks to the backend through [`MattermostApi`], so
//! the normalizer and outbound translator can be exercised against in-memory
//! fakes. [`client::MattermostClient`] is the real `reqwest` implementation.

use async_trait::async_trait;

pub mod client;
pub mod events;
pub mod status;

/// Errors from the Mattermost collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// HTTP transport failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A named channel, team, file or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other non-success response.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// A response body did not have the expected shape.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Required connection settings are missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The websocket event stream failed.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Identity established at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Our own user id.
    pub user_id: String,
    /// Our own username.
    pub username: String,
    /// Id of the team the adapter is scoped to.
    pub team_id: String,
}

/// Channel identity as needed by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Channel id.
    pub id: String,
    /// Channel name (URL slug).
    pub name: String,
    /// Owning team id; empty for direct and group messages.
    pub team_id: String,
}

/// File metadata, resolved before any bytes are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File id.
    pub id: String,
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Operations the adapter needs from a logged-in Mattermost session.
///
/// All implementations must be `Send + Sync`: the normalizer task, the
/// presence task and the gateway's calling task share one session.
#[async_trait]
pub trait MattermostApi: Send + Sync {
    /// Identity recorded at login.
    fn session(&self) -> &SessionInfo;

    /// Resolve a channel name in our team to its id.
    async fn resolve_channel_id(&self, name: &str) -> Result<String, ApiError>;

    /// Look up a channel's name and team by id.
    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo, ApiError>;

    /// Look up a username by user id.
    async fn user_name(&self, user_id: &str) -> Result<String, ApiError>;

    /// Create a post, returning its id.
    async fn post(&self, channel_id: &str, text: &str) -> Result<String, ApiError>;

    /// Replace the text of an existing post, returning its id.
    async fn edit(&self, post_id: &str, text: &str) -> Result<String, ApiError>;

    /// Delete a post.
    async fn delete(&self, post_id: &str) -> Result<(), ApiError>;

    /// Upload a file into a channel, returning the file id.
    async fn upload_file(&self, data: &[u8], channel_id: &str, name: &str)
        -> Result<String, ApiError>;

    /// Create a post referencing uploaded files, returning its id.
    async fn post_with_files(
        &self,
        channel_id: &str,
        text: &str,
        file_ids: &[String],
    ) -> Result<String, ApiError>;

    /// Fetch a file's name and size.
    async fn file_metadata(&self, file_id: &str) -> Result<FileMetadata, ApiError>;

    /// Download a file's bytes.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiError>;

    /// Get a public link to a file.
    async fn file_link(&self, file_id: &str) -> Result<String, ApiError>;

    /// Download a user's profile image.
    async fn profile_image(&self, user_id: &str) -> Result<Vec<u8>, ApiError>;

    /// Add our user to a channel.
    async fn join_channel(&self, channel_id: &str) -> Result<(), ApiError>;

    /// Set our user's presence status (`online`, `away`, ...).
    async fn set_status(&self, status: &str) -> Result<(), ApiError>;
}
