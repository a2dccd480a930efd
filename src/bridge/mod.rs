//! The adapter core: connection strategy, inbound normalization and
//! outbound translation.
//!
//! [`Bridge::connect`] resolves a [`ConnectionPlan`], logs in when the plan
//! needs a session, and starts exactly one inbound pump feeding an
//! [`EventNormalizer`] that writes to the gateway channel. The gateway calls
//! [`Bridge::send`] for the outbound direction.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

pub mod action;
pub mod avatar;
pub mod normalizer;
pub mod outbound;
pub mod plan;

pub use crate::mattermost::events::BRIDGE_ORIGIN_PROP;
pub use avatar::{AvatarCache, MediaGuard};
pub use normalizer::{EventNormalizer, NormalizerSettings, RawEvent};
pub use outbound::{OutboundSettings, OutboundTranslator, Sink};
pub use plan::{ConnectionPlan, InboundPump, OutboundSink};

use crate::config::BridgeConfig;
use crate::mattermost::client::MattermostClient;
use crate::mattermost::events::{spawn_event_stream, SessionEvent, StreamConfig};
use crate::mattermost::status::spawn_status_loop;
use crate::mattermost::{ApiError, MattermostApi};
use crate::types::CanonicalMessage;
use crate::webhook::client::WebhookClient;
use crate::webhook::{server, HookMessage, WebhookError};

/// Errors surfaced by the adapter.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The configuration does not describe a usable connection.
    #[error("configuration error: {0}")]
    Config(String),

    /// The Mattermost session failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The webhook sender or receiver failed.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// The plan has no outbound sink.
    #[error("adapter is receive-only, nothing can be sent")]
    ReceiveOnly,
}

/// A connected adapter.
///
/// Background tasks are aborted when the bridge is dropped.
pub struct Bridge {
    plan: ConnectionPlan,
    session: Option<Arc<dyn MattermostApi>>,
    outbound: OutboundTranslator,
    avatars: Arc<AvatarCache>,
    webhook_address: Option<SocketAddr>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Bridge {
    /// Resolve the plan, log in if needed, and start the background tasks.
    ///
    /// Canonical messages produced by the inbound pump are sent to `gateway`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when no connection method is
    /// configured, [`BridgeError::Api`] when login fails and
    /// [`BridgeError::Webhook`] when the receiver cannot bind. Login is not
    /// retried.
    pub async fn connect(
        config: &BridgeConfig,
        gateway: mpsc::Sender<CanonicalMessage>,
    ) -> Result<Self, BridgeError> {
        let plan = ConnectionPlan::resolve(&config.mattermost)?;
        info!(%plan, "connection strategy resolved");

        let (session, stream) = match &plan.credentials {
            Some(credentials) => {
                let client = MattermostClient::login(&config.mattermost, credentials).await?;
                let stream = client.stream_config();
                let api: Arc<dyn MattermostApi> = Arc::new(client);
                (Some(api), Some(stream))
            }
            None => (None, None),
        };

        Self::start(config, plan, session, stream, gateway).await
    }

    async fn start(
        config: &BridgeConfig,
        plan: ConnectionPlan,
        session: Option<Arc<dyn MattermostApi>>,
        stream: Option<StreamConfig>,
        gateway: mpsc::Sender<CanonicalMessage>,
    ) -> Result<Self, BridgeError> {
        let avatars = Arc::new(AvatarCache::new());
        let normalizer = EventNormalizer::new(
            session.clone(),
            Arc::clone(&avatars),
            MediaGuard::new(config.general.media_download_size),
            NormalizerSettings::from_config(config),
        );
        let buffer = config.runtime.channel_buffer_size.max(1);
        let mut tasks = Vec::new();
        let mut webhook_address = None;

        match (&plan.inbound, stream) {
            (InboundPump::Webhook { bind_address }, _) => {
                let listener = server::bind(bind_address).await?;
                webhook_address = listener.local_addr().ok();
                let (tx, rx) = mpsc::channel::<HookMessage>(buffer);
                tasks.push(server::serve(listener, tx));
                tasks.push(normalizer.spawn(rx, gateway));
                info!(address = ?webhook_address, "inbound pump: webhook receiver");
            }
            (InboundPump::Session, Some(stream)) => {
                let (tx, rx) = mpsc::channel::<SessionEvent>(buffer);
                tasks.push(spawn_event_stream(stream, tx));
                tasks.push(normalizer.spawn(rx, gateway));
                info!("inbound pump: session event stream");
            }
            (InboundPump::Session, None) => {
                return Err(BridgeError::Config(
                    "session inbound requires credentials".into(),
                ));
            }
            (InboundPump::None, _) => debug!("no inbound pump"),
        }

        if let Some(api) = &session {
            tasks.push(spawn_status_loop(
                Arc::clone(api),
                Duration::from_secs(config.runtime.status_interval_secs),
            ));
        }

        let sink = match (&plan.outbound, &session) {
            (OutboundSink::None, _) => Sink::None,
            (OutboundSink::Webhook { url }, _) => Sink::Webhook(Arc::new(WebhookClient::new(
                url.clone(),
                config.mattermost.skip_tls_verify,
            )?)),
            (OutboundSink::Session, Some(api)) => Sink::Session(Arc::clone(api)),
            (OutboundSink::Session, None) => {
                return Err(BridgeError::Config(
                    "session outbound requires credentials".into(),
                ));
            }
        };
        let outbound = OutboundTranslator::new(
            sink,
            Arc::clone(&avatars),
            OutboundSettings::from_config(config),
        );

        Ok(Self {
            plan,
            session,
            outbound,
            avatars,
            webhook_address,
            tasks,
        })
    }

    /// The plan this bridge was started with.
    pub fn plan(&self) -> &ConnectionPlan {
        &self.plan
    }

    /// Address the webhook receiver is bound to, if any.
    pub fn webhook_address(&self) -> Option<SocketAddr> {
        self.webhook_address
    }

    /// Avatar hashes confirmed so far.
    pub fn avatars(&self) -> &AvatarCache {
        &self.avatars
    }

    /// Deliver a canonical message from the gateway.
    ///
    /// # Errors
    ///
    /// See [`OutboundTranslator::send`].
    pub async fn send(&self, message: CanonicalMessage) -> Result<String, BridgeError> {
        self.outbound.send(message).await
    }

    /// Join a channel by name.
    ///
    /// Only done on pure session plans; with a webhook on either side the
    /// webhook configuration decides the channels, and this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the session error if the channel cannot be resolved or joined.
    pub async fn join_channel(&self, name: &str) -> Result<(), BridgeError> {
        let Some(api) = self.session.as_deref().filter(|_| self.plan.is_session_only()) else {
            debug!(channel = name, "not joining channel on a webhook plan");
            return Ok(());
        };
        let channel_id = api.resolve_channel_id(name).await?;
        api.join_channel(&channel_id).await?;
        Ok(())
    }

    /// Stop all background tasks.
    pub fn disconnect(self) {
        info!(tasks = self.tasks.len(), "disconnecting");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
