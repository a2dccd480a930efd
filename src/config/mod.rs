//! Configuration loading and management.
//!
//! Loads adapter configuration from `./mmbridge.toml` (or `$MMBRIDGE_CONFIG_PATH`,
//! or an explicit path). Environment variables override file values; file
//! values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default ceiling for media downloads, in bytes.
pub const DEFAULT_MEDIA_DOWNLOAD_SIZE: u64 = 1_000_000;

// ── Top-level config ────────────────────────────────────────────

/// Top-level adapter configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Mattermost connection settings (`[mattermost]`).
    pub mattermost: MattermostConfig,
    /// Settings shared with the rest of the relay (`[general]`).
    pub general: GeneralConfig,
    /// Process-level settings (`[runtime]`).
    pub runtime: RuntimeConfig,
}

impl BridgeConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// The file is `path` when given, else `$MMBRIDGE_CONFIG_PATH`, else
    /// `./mmbridge.toml`. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        };
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        match env("MMBRIDGE_CONFIG_PATH") {
            Some(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => PathBuf::from("mmbridge.toml"),
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        let mm = &mut self.mattermost;
        let string_overrides: [(&str, &mut Option<String>); 7] = [
            ("MMBRIDGE_SERVER", &mut mm.server),
            ("MMBRIDGE_TEAM", &mut mm.team),
            ("MMBRIDGE_LOGIN", &mut mm.login),
            ("MMBRIDGE_PASSWORD", &mut mm.password),
            ("MMBRIDGE_TOKEN", &mut mm.token),
            ("MMBRIDGE_WEBHOOK_URL", &mut mm.webhook_url),
            ("MMBRIDGE_WEBHOOK_BIND_ADDRESS", &mut mm.webhook_bind_address),
        ];
        for (key, slot) in string_overrides {
            if let Some(v) = env(key) {
                *slot = Some(v);
            }
        }

        if let Some(v) = env("MMBRIDGE_MEDIA_DOWNLOAD_SIZE") {
            match v.trim().parse() {
                Ok(n) => self.general.media_download_size = n,
                Err(_) => tracing::warn!(
                    var = "MMBRIDGE_MEDIA_DOWNLOAD_SIZE",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        if let Some(v) = env("MMBRIDGE_LOG_LEVEL") {
            self.runtime.log_level = v;
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly-typed fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

// ── Mattermost config ───────────────────────────────────────────

/// Mattermost connection settings.
///
/// The four connection inputs (`webhook_bind_address`, `webhook_url`,
/// `token`, `login`) are optional; empty strings count as unset.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct MattermostConfig {
    /// Server host (`chat.example.com`) or full base URL.
    pub server: Option<String>,
    /// Team name the adapter is scoped to.
    pub team: Option<String>,
    /// Login name for credential authentication.
    pub login: Option<String>,
    /// Password for credential authentication.
    pub password: Option<String>,
    /// Personal access token; takes precedence over login/password.
    pub token: Option<String>,
    /// Incoming-webhook URL used to send messages.
    pub webhook_url: Option<String>,
    /// Local address on which outgoing webhooks are received.
    pub webhook_bind_address: Option<String>,
    /// Default icon for webhook posts.
    pub icon_url: Option<String>,
    /// Text appended to relayed edits.
    pub edit_suffix: String,
    /// Drop edit events instead of relaying them.
    pub edit_disable: bool,
    /// Prefix outgoing text with the sender's display name.
    pub prefix_messages_with_nick: bool,
    /// Accept invalid TLS certificates.
    pub skip_tls_verify: bool,
    /// Use plain `http`/`ws` when `server` has no scheme.
    pub no_tls: bool,
    /// Channel names joined at startup.
    pub channels: Vec<String>,
}

impl MattermostConfig {
    /// Webhook bind address (B), if set.
    pub fn webhook_bind_address(&self) -> Option<&str> {
        non_empty(&self.webhook_bind_address)
    }

    /// Webhook send URL (W), if set.
    pub fn webhook_url(&self) -> Option<&str> {
        non_empty(&self.webhook_url)
    }

    /// Auth token (T), if set.
    pub fn token(&self) -> Option<&str> {
        non_empty(&self.token)
    }

    /// Login name (L), if set.
    pub fn login(&self) -> Option<&str> {
        non_empty(&self.login)
    }

    /// Password, or the empty string.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    /// Server host or URL, if set.
    pub fn server(&self) -> Option<&str> {
        non_empty(&self.server)
    }

    /// Team name, if set.
    pub fn team(&self) -> Option<&str> {
        non_empty(&self.team)
    }

    /// Default webhook icon, if set.
    pub fn icon_url(&self) -> Option<&str> {
        non_empty(&self.icon_url)
    }
}

impl std::fmt::Debug for MattermostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "__REDACTED__");
        f.debug_struct("MattermostConfig")
            .field("server", &self.server)
            .field("team", &self.team)
            .field("login", &self.login)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .field("webhook_url", &self.webhook_url)
            .field("webhook_bind_address", &self.webhook_bind_address)
            .field("icon_url", &self.icon_url)
            .field("edit_suffix", &self.edit_suffix)
            .field("edit_disable", &self.edit_disable)
            .field("prefix_messages_with_nick", &self.prefix_messages_with_nick)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .field("no_tls", &self.no_tls)
            .field("channels", &self.channels)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ── General config ──────────────────────────────────────────────

/// Settings shared across relay adapters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Media server upload endpoint; enables avatar downloads when set.
    pub media_server_upload: Option<String>,
    /// Public base URL of the media server, used to build avatar URLs.
    pub media_server_download: Option<String>,
    /// Largest file or avatar fetched from the backend, in bytes (inclusive).
    pub media_download_size: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            media_server_upload: None,
            media_server_download: None,
            media_download_size: DEFAULT_MEDIA_DOWNLOAD_SIZE,
        }
    }
}

impl GeneralConfig {
    /// Media upload destination, if configured.
    pub fn media_server_upload(&self) -> Option<&str> {
        non_empty(&self.media_server_upload)
    }

    /// Media download base URL, if configured.
    pub fn media_server_download(&self) -> Option<&str> {
        non_empty(&self.media_server_download)
    }
}

// ── Runtime config ──────────────────────────────────────────────

/// Process-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tracing level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rotated JSON logs; console-only when unset.
    pub logs_dir: Option<String>,
    /// Buffer size for the inbound pump and gateway channels.
    pub channel_buffer_size: usize,
    /// Seconds between presence updates on session connections.
    pub status_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            logs_dir: None,
            channel_buffer_size: 100,
            status_interval_secs: 60,
        }
    }
}
