//! Connection strategy resolution.
//!
//! Four optional inputs decide everything: the webhook bind address (B), the
//! webhook URL (W), a token (T) and login credentials (L). They are resolved
//! once, by a single ordered rule table, into an immutable [`ConnectionPlan`].

use std::fmt;

use super::BridgeError;
use crate::config::MattermostConfig;
use crate::mattermost::client::Credentials;

/// Where inbound events come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPump {
    /// No inbound traffic.
    None,
    /// Outgoing-webhook receiver listening on an address.
    Webhook {
        /// Listen address (`0.0.0.0:9999`).
        bind_address: String,
    },
    /// Websocket event stream of the logged-in session.
    Session,
}

/// Where outbound messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundSink {
    /// Receive-only: `send` fails.
    None,
    /// Incoming-webhook URL. Post only.
    Webhook {
        /// Webhook URL.
        url: String,
    },
    /// REST API of the logged-in session.
    Session,
}

/// The connection strategy, derived once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPlan {
    /// Inbound pump.
    pub inbound: InboundPump,
    /// Outbound sink.
    pub outbound: OutboundSink,
    /// Credentials to log in with; `Some` exactly when a session is needed.
    pub credentials: Option<Credentials>,
}

impl ConnectionPlan {
    /// Resolve the plan from configuration.
    ///
    /// | B | W | T or L | inbound | outbound |
    /// |---|---|--------|---------|----------|
    /// | ✓ | ✓ | any    | webhook | webhook  |
    /// | ✓ |   | ✓      | webhook | session  |
    /// | ✓ |   |        | webhook | none     |
    /// |   | ✓ | ✓      | session | webhook  |
    /// |   | ✓ |        | none    | webhook  |
    /// |   |   | ✓      | session | session  |
    ///
    /// A token wins over login credentials.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when none of the four inputs is set.
    pub fn resolve(config: &MattermostConfig) -> Result<Self, BridgeError> {
        let bind = config.webhook_bind_address();
        let url = config.webhook_url();
        let credentials = Credentials::from_config(config);

        let (inbound, outbound, credentials) = match (bind, url, credentials) {
            (Some(bind), Some(url), _) => (webhook_in(bind), webhook_out(url), None),
            (Some(bind), None, Some(creds)) => (webhook_in(bind), OutboundSink::Session, Some(creds)),
            (Some(bind), None, None) => (webhook_in(bind), OutboundSink::None, None),
            (None, Some(url), Some(creds)) => (InboundPump::Session, webhook_out(url), Some(creds)),
            (None, Some(url), None) => (InboundPump::None, webhook_out(url), None),
            (None, None, Some(creds)) => (InboundPump::Session, OutboundSink::Session, Some(creds)),
            (None, None, None) => {
                return Err(BridgeError::Config("no connection method configured".into()));
            }
        };

        Ok(Self {
            inbound,
            outbound,
            credentials,
        })
    }

    /// Whether a login is required.
    pub fn needs_session(&self) -> bool {
        self.credentials.is_some()
    }

    /// Both directions go through the session API.
    pub fn is_session_only(&self) -> bool {
        self.inbound == InboundPump::Session && self.outbound == OutboundSink::Session
    }
}

fn webhook_in(bind: &str) -> InboundPump {
    InboundPump::Webhook {
        bind_address: bind.to_owned(),
    }
}

fn webhook_out(url: &str) -> OutboundSink {
    OutboundSink::Webhook {
        url: url.to_owned(),
    }
}

impl fmt::Display for InboundPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Webhook { bind_address } => write!(f, "webhook({bind_address})"),
            Self::Session => f.write_str("session"),
        }
    }
}

impl fmt::Display for OutboundSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            // The URL carries the webhook secret.
            Self::Webhook { .. } => f.write_str("webhook"),
            Self::Session => f.write_str("session"),
        }
    }
}

impl fmt::Display for ConnectionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth = self.credentials.as_ref().map_or("none", Credentials::kind);
        write!(
            f,
            "inbound={} outbound={} auth={auth}",
            self.inbound, self.outbound
        )
    }
}
