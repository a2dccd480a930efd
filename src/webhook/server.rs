//! Outgoing-webhook receiver.
//!
//! An axum server with a single `POST /` route. Each form-encoded delivery
//! is parsed into a [`HookMessage`] and handed to the inbound pump.

use std::net::SocketAddr;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{HookMessage, WebhookError};

#[derive(Clone)]
struct ReceiverState {
    tx: mpsc::Sender<HookMessage>,
}

/// Build the receiver router.
pub fn router(tx: mpsc::Sender<HookMessage>) -> Router {
    Router::new()
        .route("/", post(receive))
        .with_state(ReceiverState { tx })
}

async fn receive(
    State(state): State<ReceiverState>,
    Form(message): Form<HookMessage>,
) -> StatusCode {
    debug!(
        channel = %message.channel_name,
        user = %message.user_name,
        "received outgoing webhook"
    );
    if state.tx.send(message).await.is_err() {
        error!("webhook pump is closed, rejecting delivery");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// Bind the receiver's listen address.
///
/// # Errors
///
/// Returns [`WebhookError::Bind`] if the address is in use or invalid.
pub async fn bind(address: &str) -> Result<TcpListener, WebhookError> {
    Ok(TcpListener::bind(address).await?)
}

/// Serve deliveries from `listener` until the task is aborted.
pub fn serve(listener: TcpListener, tx: mpsc::Sender<HookMessage>) -> tokio::task::JoinHandle<()> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    tokio::spawn(async move {
        info!(address = ?local, "webhook receiver listening");
        if let Err(e) = axum::serve(listener, router(tx)).await {
            error!(error = %e, "webhook receiver stopped");
        }
    })
}
