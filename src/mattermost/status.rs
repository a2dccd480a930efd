//! Presence loop: keeps the adapter user shown as online.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::MattermostApi;

/// Status value sent on every tick.
pub const ONLINE: &str = "online";

/// Spawn a task that sets the session user's status every `interval`.
///
/// Intervals under one second are raised to one second. Failures are
/// logged and retried on the next tick.
pub fn spawn_status_loop(
    api: Arc<dyn MattermostApi>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match api.set_status(ONLINE).await {
                Ok(()) => debug!(user_id = %api.session().user_id, "presence refreshed"),
                Err(e) => warn!(error = %e, "failed to refresh presence"),
            }
        }
    })
}
