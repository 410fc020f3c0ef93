//! Per-connection read loop.
//!
//! Runs from registration until the socket closes. Each text frame is
//! classified and dispatched; malformed frames are logged and skipped
//! without touching the connection. On exit the connection is unregistered
//! and `on_disconnect` fires exactly once, after the last `on_message`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use courier_core::wire::{self, CLOSE_GOING_AWAY};
use courier_core::{CustomHandlerTable, WireFrame};
use futures::stream::SplitStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::ServerEvents;
use crate::registry::{ConnectionRecord, ConnectionRegistry, ConnectionSender};
use crate::server::StatsCounters;
use crate::ServerConfig;

pub(crate) struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub events: Arc<dyn ServerEvents>,
    pub custom: Arc<CustomHandlerTable>,
    pub stats: Arc<StatsCounters>,
    pub config: ServerConfig,
    pub shutdown: CancellationToken,
}

/// Drive one registered connection until it closes.
pub(crate) async fn run_session(
    mut stream: SplitStream<WebSocket>,
    sender: ConnectionSender,
    record: Arc<ConnectionRecord>,
    ctx: SessionContext,
) {
    let uuid = &record.uuid;

    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => {
                let _ = sender.send_close(CLOSE_GOING_AWAY, "server shutting down").await;
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(text.as_str(), &record, &ctx).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    // Some peers ship JSON in binary frames; accept UTF-8.
                    match std::str::from_utf8(&data) {
                        Ok(text) => handle_text(text, &record, &ctx).await,
                        Err(_) => {
                            ctx.stats.record_malformed();
                            warn!(%uuid, len = data.len(), "non-UTF8 binary frame, skipping");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(%uuid, ?frame, "client sent close frame");
                    break;
                }
                // axum replies to pings automatically; nothing to track.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(error)) => {
                    warn!(%uuid, %error, "websocket receive error");
                    break;
                }
                None => {
                    debug!(%uuid, "websocket stream ended");
                    break;
                }
            }
        }
    }

    if ctx.registry.unregister(uuid).is_some() {
        if ctx.config.enable_connection_log {
            info!(%uuid, user_id = %record.user_id, platform = %record.platform, "connection closed");
        }
        ctx.events.on_disconnect(uuid, &record.meta).await;
    }
}

async fn handle_text(text: &str, record: &ConnectionRecord, ctx: &SessionContext) {
    match wire::decode_frame(text) {
        Ok(WireFrame::Standard(envelope)) => {
            ctx.stats.record_message();
            if ctx.config.enable_message_log {
                debug!(
                    uuid = %record.uuid,
                    api_key = %envelope.api_key(),
                    platform = %envelope.platform(),
                    "envelope received"
                );
            }
            ctx.events.on_message(envelope, &record.meta).await;
        }
        Ok(WireFrame::Custom(custom)) => {
            ctx.stats.record_custom();
            ctx.custom
                .dispatch(&custom.message_type, custom.payload, &record.meta)
                .await;
        }
        Err(error) => {
            ctx.stats.record_malformed();
            warn!(uuid = %record.uuid, %error, "malformed frame, skipping");
        }
    }
}
