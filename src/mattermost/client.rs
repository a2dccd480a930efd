//! HTTP client for the Mattermost v4 REST API.
//!
//! Logs in once (token or login/password), records the session identity and
//! team id, and then serves every [`MattermostApi`] operation over `reqwest`.
//! Channel and user lookups are memoised for the life of the client.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::events::StreamConfig;
use super::{ApiError, ChannelInfo, FileMetadata, MattermostApi, SessionInfo};
use crate::config::MattermostConfig;

/// HTTP connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout; generous because file transfers share the client.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Error bodies are cut to this many characters before being surfaced.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// How the adapter authenticates against the server.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Personal access token, used as a bearer token.
    Token(String),
    /// Login name and password.
    Password {
        /// Login name or email.
        login: String,
        /// Password.
        password: String,
    },
}

impl Credentials {
    /// Pick credentials from configuration; a token wins over login/password.
    pub fn from_config(config: &MattermostConfig) -> Option<Self> {
        if let Some(token) = config.token() {
            return Some(Self::Token(token.to_owned()));
        }
        config.login().map(|login| Self::Password {
            login: login.to_owned(),
            password: config.password().to_owned(),
        })
    }

    /// Short label for logs and plan descriptions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Password { .. } => "password",
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.debug_tuple("Token").field(&"__REDACTED__").finish(),
            Self::Password { login, .. } => f
                .debug_struct("Password")
                .field("login", login)
                .field("password", &"__REDACTED__")
                .finish(),
        }
    }
}

/// Logged-in Mattermost REST client.
pub struct MattermostClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    skip_tls_verify: bool,
    session: SessionInfo,
    /// Channels by id.
    channels: RwLock<HashMap<String, ChannelInfo>>,
    /// Usernames by user id.
    users: RwLock<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    username: String,
}

#[derive(Deserialize)]
struct TeamResponse {
    id: String,
}

#[derive(Deserialize)]
struct ChannelResponse {
    id: String,
    name: String,
    #[serde(default)]
    team_id: String,
}

impl From<ChannelResponse> for ChannelInfo {
    fn from(c: ChannelResponse) -> Self {
        Self {
            id: c.id,
            name: c.name,
            team_id: c.team_id,
        }
    }
}

#[derive(Deserialize)]
struct PostResponse {
    id: String,
}

#[derive(Deserialize)]
struct FileInfoResponse {
    id: String,
    name: String,
    #[serde(default)]
    size: i64,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    file_infos: Vec<FileInfoResponse>,
}

#[derive(Deserialize)]
struct LinkResponse {
    link: String,
}

/// Build the server base URL from a bare host or a full URL.
///
/// A bare host gets `https://`, or `http://` when `no_tls` is set.
///
/// # Errors
///
/// Returns [`ApiError::InvalidConfig`] if the result is not an http(s) URL.
pub fn server_url(server: &str, no_tls: bool) -> Result<String, ApiError> {
    let trimmed = server.trim().trim_end_matches('/');
    let candidate = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        let scheme = if no_tls { "http" } else { "https" };
        format!("{scheme}://{trimmed}")
    };

    let parsed = url::Url::parse(&candidate)
        .map_err(|e| ApiError::InvalidConfig(format!("invalid server {server:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(candidate),
        other => Err(ApiError::InvalidConfig(format!(
            "unsupported server scheme {other:?}"
        ))),
    }
}

/// Websocket endpoint for a server base URL.
pub fn websocket_url(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}/api/v4/websocket")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}/api/v4/websocket")
    } else {
        format!("{base_url}/api/v4/websocket")
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return format!("{shortened}...[truncated]");
    }
    body.to_owned()
}

/// Map a non-success response onto an [`ApiError`].
async fn check(resp: Response, what: &str) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = truncate_body(&resp.text().await.unwrap_or_default());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Auth(format!("{what}: {body}"))
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(what.to_owned()),
        _ => ApiError::Status {
            status: status.as_u16(),
            body,
        },
    })
}

async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    token: &str,
    what: &str,
) -> Result<T, ApiError> {
    let resp = http.get(url).bearer_auth(token).send().await?;
    let resp = check(resp, what).await?;
    Ok(resp.json().await?)
}

/// `{base_url}/api/v4/{segments...}` with every segment percent-encoded.
fn api_url(base_url: &str, segments: &[&str]) -> Result<String, ApiError> {
    let mut url = url::Url::parse(base_url)
        .map_err(|e| ApiError::InvalidConfig(format!("invalid server URL {base_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ApiError::InvalidConfig(format!("server URL {base_url} cannot be a base")))?
        .pop_if_empty()
        .extend(["api", "v4"])
        .extend(segments);
    Ok(url.into())
}

fn build_http_client(skip_tls_verify: bool) -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder()
        .danger_accept_invalid_certs(skip_tls_verify)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?)
}

impl MattermostClient {
    /// Log in and resolve the configured team.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] when `server` or `team` is missing,
    /// [`ApiError::Auth`] when the server rejects the credentials, and
    /// [`ApiError::NotFound`] when the team does not exist.
    pub async fn login(
        config: &MattermostConfig,
        credentials: &Credentials,
    ) -> Result<Self, ApiError> {
        let server = config.server().ok_or_else(|| {
            ApiError::InvalidConfig("server must be set for token or login connections".into())
        })?;
        let team = config.team().ok_or_else(|| {
            ApiError::InvalidConfig("team must be set for token or login connections".into())
        })?;
        let base_url = server_url(server, config.no_tls)?;
        let http = build_http_client(config.skip_tls_verify)?;

        info!(server = %base_url, team, auth = credentials.kind(), "logging in to Mattermost");

        let (token, user) = match credentials {
            Credentials::Token(token) => {
                let url = format!("{base_url}/api/v4/users/me");
                let user: UserResponse = get_json(&http, &url, token, "token login").await?;
                (token.clone(), user)
            }
            Credentials::Password { login, password } => {
                let resp = http
                    .post(format!("{base_url}/api/v4/users/login"))
                    .json(&json!({ "login_id": login, "password": password }))
                    .send()
                    .await?;
                let resp = check(resp, "password login").await?;
                let token = resp
                    .headers()
                    .get("Token")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        ApiError::Auth("login response carried no session token".into())
                    })?;
                let user: UserResponse = resp.json().await?;
                (token, user)
            }
        };

        let team_url = api_url(&base_url, &["teams", "name", team])?;
        let team_info: TeamResponse =
            get_json(&http, &team_url, &token, &format!("team {team}")).await?;

        info!(user = %user.username, team_id = %team_info.id, "Mattermost login succeeded");

        Ok(Self {
            http,
            base_url,
            token,
            skip_tls_verify: config.skip_tls_verify,
            session: SessionInfo {
                user_id: user.id,
                username: user.username,
                team_id: team_info.id,
            },
            channels: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
        })
    }

    /// Settings for the websocket event stream of this session.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: websocket_url(&self.base_url),
            token: self.token.clone(),
            skip_tls_verify: self.skip_tls_verify,
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base_url)
    }

    fn remember_channel(&self, info: &ChannelInfo) {
        if let Ok(mut map) = self.channels.write() {
            map.insert(info.id.clone(), info.clone());
        }
    }

    fn cached_channel_by_name(&self, name: &str) -> Option<String> {
        let map = self.channels.read().ok()?;
        map.values()
            .find(|c| c.name == name && c.team_id == self.session.team_id)
            .map(|c| c.id.clone())
    }

    async fn send_post(&self, body: serde_json::Value) -> Result<String, ApiError> {
        let resp = self
            .http
            .post(self.api("/posts"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let post: PostResponse = check(resp, "create post").await?.json().await?;
        Ok(post.id)
    }

    async fn get_bytes(&self, path: &str, what: &str) -> Result<Vec<u8>, ApiError> {
        let resp = self
            .http
            .get(self.api(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let bytes = check(resp, what).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl MattermostApi for MattermostClient {
    fn session(&self) -> &SessionInfo {
        &self.session
    }

    async fn resolve_channel_id(&self, name: &str) -> Result<String, ApiError> {
        if let Some(id) = self.cached_channel_by_name(name) {
            return Ok(id);
        }
        let url = api_url(
            &self.base_url,
            &["teams", &self.session.team_id, "channels", "name", name],
        )?;
        let channel: ChannelResponse =
            get_json(&self.http, &url, &self.token, &format!("channel {name}")).await?;
        let info = ChannelInfo::from(channel);
        self.remember_channel(&info);
        Ok(info.id)
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo, ApiError> {
        let cached = self
            .channels
            .read()
            .ok()
            .and_then(|map| map.get(channel_id).cloned());
        if let Some(info) = cached {
            return Ok(info);
        }
        let url = self.api(&format!("/channels/{channel_id}"));
        let channel: ChannelResponse =
            get_json(&self.http, &url, &self.token, &format!("channel {channel_id}")).await?;
        let info = ChannelInfo::from(channel);
        self.remember_channel(&info);
        Ok(info)
    }

    async fn user_name(&self, user_id: &str) -> Result<String, ApiError> {
        let cached = self
            .users
            .read()
            .ok()
            .and_then(|map| map.get(user_id).cloned());
        if let Some(name) = cached {
            return Ok(name);
        }
        let url = self.api(&format!("/users/{user_id}"));
        let user: UserResponse =
            get_json(&self.http, &url, &self.token, &format!("user {user_id}")).await?;
        if let Ok(mut map) = self.users.write() {
            map.insert(user.id.clone(), user.username.clone());
        }
        Ok(user.username)
    }

    async fn post(&self, channel_id: &str, text: &str) -> Result<String, ApiError> {
        let id = self
            .send_post(json!({ "channel_id": channel_id, "message": text }))
            .await?;
        debug!(channel_id, post_id = %id, "post created");
        Ok(id)
    }

    async fn edit(&self, post_id: &str, text: &str) -> Result<String, ApiError> {
        let resp = self
            .http
            .put(self.api(&format!("/posts/{post_id}/patch")))
            .bearer_auth(&self.token)
            .json(&json!({ "message": text }))
            .send()
            .await?;
        let post: PostResponse = check(resp, &format!("post {post_id}")).await?.json().await?;
        debug!(post_id = %post.id, "post edited");
        Ok(post.id)
    }

    async fn delete(&self, post_id: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .delete(self.api(&format!("/posts/{post_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        check(resp, &format!("post {post_id}")).await?;
        debug!(post_id, "post deleted");
        Ok(())
    }

    async fn upload_file(
        &self,
        data: &[u8],
        channel_id: &str,
        name: &str,
    ) -> Result<String, ApiError> {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(name.to_owned());
        let form = reqwest::multipart::Form::new()
            .text("channel_id", channel_id.to_owned())
            .part("files", part);
        let resp = self
            .http
            .post(self.api("/files"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let upload: UploadResponse = check(resp, "upload file").await?.json().await?;
        let file = upload
            .file_infos
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("file info for uploaded {name}")))?;
        debug!(channel_id, file_id = %file.id, name, "file uploaded");
        Ok(file.id)
    }

    async fn post_with_files(
        &self,
        channel_id: &str,
        text: &str,
        file_ids: &[String],
    ) -> Result<String, ApiError> {
        self.send_post(json!({
            "channel_id": channel_id,
            "message": text,
            "file_ids": file_ids,
        }))
        .await
    }

    async fn file_metadata(&self, file_id: &str) -> Result<FileMetadata, ApiError> {
        let url = self.api(&format!("/files/{file_id}/info"));
        let info: FileInfoResponse =
            get_json(&self.http, &url, &self.token, &format!("file {file_id}")).await?;
        Ok(FileMetadata {
            id: info.id,
            name: info.name,
            size: u64::try_from(info.size).unwrap_or_default(),
        })
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(&format!("/files/{file_id}"), &format!("file {file_id}"))
            .await
    }

    async fn file_link(&self, file_id: &str) -> Result<String, ApiError> {
        let url = self.api(&format!("/files/{file_id}/link"));
        let link: LinkResponse =
            get_json(&self.http, &url, &self.token, &format!("file link {file_id}")).await?;
        Ok(link.link)
    }

    async fn profile_image(&self, user_id: &str) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(
            &format!("/users/{user_id}/image"),
            &format!("profile image {user_id}"),
        )
        .await
    }

    async fn join_channel(&self, channel_id: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.api(&format!("/channels/{channel_id}/members")))
            .bearer_auth(&self.token)
            .json(&json!({ "user_id": self.session.user_id }))
            .send()
            .await?;
        check(resp, &format!("channel {channel_id}")).await?;
        info!(channel_id, "joined channel");
        Ok(())
    }

    async fn set_status(&self, status: &str) -> Result<(), ApiError> {
        let user_id = &self.session.user_id;
        let resp = self
            .http
            .put(self.api(&format!("/users/{user_id}/status")))
            .bearer_auth(&self.token)
            .json(&json!({ "user_id": user_id, "status": status }))
            .send()
            .await?;
        check(resp, "status update").await?;
        Ok(())
    }
}
