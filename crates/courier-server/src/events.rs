//! Server-side lifecycle callbacks.
//!
//! The application observes connections through a single [`ServerEvents`]
//! implementation passed at construction. Default methods log and move on,
//! so implementors override only what they need. Callback failures must not
//! escape: the methods return `()`, and anything fallible inside an
//! implementation is its own responsibility to log.

use async_trait::async_trait;
use courier_core::{ConnectMeta, ConnectionId, Envelope};
use tracing::{debug, info};

/// Application hooks for connection lifecycle and inbound envelopes.
///
/// `on_connect` strictly precedes any `on_message` for the same connection;
/// `on_disconnect` strictly follows the last one. The server does not
/// auto-forward inbound envelopes — re-routing via
/// [`crate::CourierServer::send_message`] is the application's decision,
/// typically made inside `on_message`.
#[async_trait]
pub trait ServerEvents: Send + Sync {
    /// A connection was authenticated and registered.
    async fn on_connect(&self, uuid: &ConnectionId, meta: &ConnectMeta) {
        info!(%uuid, platform = %meta.platform, "client connected");
    }

    /// A standard envelope arrived on a registered connection.
    async fn on_message(&self, envelope: Envelope, meta: &ConnectMeta) {
        debug!(
            api_key = %envelope.api_key(),
            platform = %envelope.platform(),
            from = %meta.api_key,
            "envelope received"
        );
    }

    /// A connection was unregistered (close, read error, or shutdown).
    async fn on_disconnect(&self, uuid: &ConnectionId, meta: &ConnectMeta) {
        info!(%uuid, platform = %meta.platform, "client disconnected");
    }
}

/// The default event sink: log-only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEvents;

#[async_trait]
impl ServerEvents for LogEvents {}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::envelope::{MessageDim, MessageInfo, Segment};

    #[tokio::test]
    async fn default_methods_do_not_panic() {
        let events = LogEvents;
        let uuid = ConnectionId::new();
        let meta = ConnectMeta::new("k", "p");
        events.on_connect(&uuid, &meta).await;
        events
            .on_message(
                Envelope::new(
                    MessageInfo::now("p", "m1"),
                    Segment::text("x"),
                    MessageDim::new("k", "p"),
                ),
                &meta,
            )
            .await;
        events.on_disconnect(&uuid, &meta).await;
    }
}
