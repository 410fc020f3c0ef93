//! Client-side lifecycle callbacks.

use async_trait::async_trait;
use courier_core::{ConnectMeta, ConnectionId, Envelope};
use tracing::{debug, info, warn};

/// Application hooks for the client's connection lifecycle and inbound
/// envelopes. Defaults log and move on.
#[async_trait]
pub trait ClientEvents: Send + Sync {
    /// A connection reached the `Connected` state.
    async fn on_connect(&self, id: &ConnectionId, meta: &ConnectMeta) {
        info!(%id, platform = %meta.platform, "connected to server");
    }

    /// A connection left the `Connected` state. `error` is `None` for
    /// clean closes and operator-initiated disconnects.
    async fn on_disconnect(&self, id: &ConnectionId, error: Option<&str>) {
        match error {
            Some(error) => warn!(%id, error, "disconnected from server"),
            None => info!(%id, "disconnected from server"),
        }
    }

    /// A standard envelope arrived.
    async fn on_message(&self, envelope: Envelope, meta: &ConnectMeta) {
        debug!(
            api_key = %envelope.api_key(),
            platform = %envelope.platform(),
            via = %meta.platform,
            "envelope received"
        );
    }
}

/// The default event sink: log-only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEvents;

#[async_trait]
impl ClientEvents for LogEvents {}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::envelope::{MessageDim, MessageInfo, Segment};

    #[tokio::test]
    async fn default_methods_do_not_panic() {
        let events = LogEvents;
        let id = ConnectionId::new();
        let meta = ConnectMeta::new("k", "p");
        events.on_connect(&id, &meta).await;
        events.on_disconnect(&id, Some("pong timeout")).await;
        events.on_disconnect(&id, None).await;
        events
            .on_message(
                Envelope::new(
                    MessageInfo::now("p", "m"),
                    Segment::text("x"),
                    MessageDim::new("k", "p"),
                ),
                &meta,
            )
            .await;
    }
}
