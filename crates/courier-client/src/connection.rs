//! A single outbound WebSocket connection.
//!
//! Each connection owns one socket bound to a fixed `(url, api_key,
//! platform)`. A background run loop drives the state machine:
//!
//! ```text
//! Idle → Connecting → (Connected | Reconnecting) ⇄ Reconnecting → Stopped
//! ```
//!
//! While `Connected`, a select loop pumps inbound frames, sends heartbeat
//! pings every `ping_interval`, and declares the link dead when no pong
//! arrives within `ping_timeout`. Transport failures feed the reconnect
//! policy: exponential backoff from `reconnect_delay` up to
//! `max_reconnect_delay`, giving up after `max_reconnect_attempts`.
//! Only `Connected` connections are eligible for outbound routing.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::wire::{self, CustomMessage};
use courier_core::{
    reconnect_delay, ConnectMeta, ConnectionId, CourierError, CustomHandlerTable, Envelope,
    WireFrame,
};

use crate::config::ConnectionConfig;
use crate::events::ClientEvents;
use crate::tls;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Lifecycle state of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Added but never started, or explicitly disconnected.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// Live; eligible for outbound routing.
    Connected,
    /// Waiting out the backoff before the next attempt.
    Reconnecting,
    /// Gave up or was stopped; terminal until re-added.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why the pump loop ended.
enum PumpExit {
    Cancelled,
    Closed,
    PongTimeout,
    Transport(String),
}

struct Runner {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One supervised outbound connection.
pub struct ClientConnection {
    id: ConnectionId,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    sink: AsyncMutex<Option<WsSink>>,
    runner: Mutex<Option<Runner>>,
    reconnect_attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    events: Arc<dyn ClientEvents>,
    custom: Arc<CustomHandlerTable>,
}

impl ClientConnection {
    pub(crate) fn new(
        id: ConnectionId,
        config: ConnectionConfig,
        events: Arc<dyn ClientEvents>,
        custom: Arc<CustomHandlerTable>,
    ) -> Self {
        Self {
            id,
            config,
            state: Mutex::new(ConnectionState::Idle),
            sink: AsyncMutex::new(None),
            runner: Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            last_error: Mutex::new(None),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            events,
            custom,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub(crate) fn meta(&self) -> ConnectMeta {
        ConnectMeta::new(self.config.api_key.clone(), self.config.platform.clone())
    }

    /// Start the run loop. Returns `false` unless the connection is `Idle`.
    pub fn connect(self: &Arc<Self>) -> bool {
        let mut runner = self.runner.lock();
        if self.state() != ConnectionState::Idle || runner.is_some() {
            return false;
        }
        self.set_state(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(self.clone(), cancel.clone()));
        *runner = Some(Runner { cancel, task });
        true
    }

    /// Operator-initiated disconnect: back to `Idle`, no reconnect attempts
    /// consumed.
    pub async fn disconnect(&self) {
        self.teardown(ConnectionState::Idle).await;
    }

    /// Final stop: lands in `Stopped`.
    pub(crate) async fn stop(&self) {
        self.teardown(ConnectionState::Stopped).await;
    }

    async fn teardown(&self, final_state: ConnectionState) {
        let runner = self.runner.lock().take();
        let Some(Runner { cancel, task }) = runner else {
            // No run loop; Stopped stays terminal, anything else parks Idle.
            if self.state() != ConnectionState::Stopped {
                self.set_state(final_state);
            }
            return;
        };

        cancel.cancel();
        if tokio::time::timeout(self.config.close_timeout, task)
            .await
            .is_err()
        {
            warn!(id = %self.id, "run loop did not stop in time");
        }

        // The run loop normally closes the socket; cover the cancel-during-
        // connect window where a sink may still be parked here.
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = tokio::time::timeout(self.config.close_timeout, sink.close()).await;
        }
        drop(guard);

        // A run loop that already exhausted its budget stays Stopped.
        if self.state() != ConnectionState::Stopped {
            self.set_state(final_state);
        }
    }

    /// Push one serialized frame on the socket. `false` unless `Connected`
    /// and the write flushed.
    pub async fn send_text(&self, text: &str) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return false;
        };
        match sink.send(Message::text(text.to_owned())).await {
            Ok(()) => {
                let _ = self.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(error) => {
                debug!(id = %self.id, %error, "send failed");
                false
            }
        }
    }

    /// Serialize and send an envelope.
    pub async fn send_envelope(&self, envelope: &Envelope) -> bool {
        match wire::encode_envelope(envelope) {
            Ok(text) => self.send_text(&text).await,
            Err(error) => {
                warn!(id = %self.id, %error, "envelope serialization failed");
                false
            }
        }
    }

    /// Serialize and send a custom message.
    pub async fn send_custom(&self, message: &CustomMessage) -> bool {
        match wire::encode_custom(message) {
            Ok(text) => self.send_text(&text).await,
            Err(error) => {
                warn!(id = %self.id, %error, "custom message serialization failed");
                false
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn set_last_error(&self, error: Option<String>) {
        *self.last_error.lock() = error;
    }

    async fn establish(&self) -> Result<WsStream, CourierError> {
        let connector = tls::connector(&self.config.tls)?;

        let mut request = self
            .config
            .request_url()
            .into_client_request()
            .map_err(|e| CourierError::config(format!("invalid url: {e}")))?;
        let headers = request.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&self.config.api_key) {
            let _ = headers.insert("x-apikey", value);
        }
        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                let _ = headers.insert(name, value);
            }
        }

        let (ws, _response) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| CourierError::transport(e.to_string()))?;
        Ok(ws)
    }

    /// Pump inbound frames and heartbeats until the link dies or is
    /// cancelled.
    async fn pump(&self, stream: &mut SplitStream<WsStream>, cancel: &CancellationToken) -> PumpExit {
        let mut ping = tokio::time::interval(self.config.ping_interval);
        // The first tick fires immediately; the connection is fresh.
        let _ = ping.tick().await;
        let mut pong_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return PumpExit::Cancelled,
                _ = ping.tick() => {
                    if !self.send_ping().await {
                        return PumpExit::Transport("ping write failed".into());
                    }
                    if pong_deadline.is_none() {
                        pong_deadline =
                            Some(tokio::time::Instant::now() + self.config.ping_timeout);
                    }
                }
                () = wait_deadline(pong_deadline) => {
                    warn!(id = %self.id, "pong timeout");
                    return PumpExit::PongTimeout;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => {
                        match std::str::from_utf8(&data) {
                            Ok(text) => self.handle_text(text).await,
                            Err(_) => warn!(id = %self.id, "non-UTF8 binary frame, skipping"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => pong_deadline = None,
                    // tungstenite queues the pong reply on its own.
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        debug!(id = %self.id, ?frame, "server sent close frame");
                        return PumpExit::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return PumpExit::Transport(error.to_string()),
                    None => return PumpExit::Closed,
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        match wire::decode_frame(text) {
            Ok(WireFrame::Standard(envelope)) => {
                let _ = self.messages_received.fetch_add(1, Ordering::Relaxed);
                if self.config.enable_message_log {
                    debug!(
                        id = %self.id,
                        api_key = %envelope.api_key(),
                        platform = %envelope.platform(),
                        "envelope received"
                    );
                }
                self.events.on_message(envelope, &self.meta()).await;
            }
            Ok(WireFrame::Custom(custom)) => {
                self.custom
                    .dispatch(&custom.message_type, custom.payload, &self.meta())
                    .await;
            }
            Err(error) => {
                warn!(id = %self.id, %error, "malformed frame, skipping");
            }
        }
    }

    async fn send_ping(&self) -> bool {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return false;
        };
        sink.send(Message::Ping(Vec::new().into())).await.is_ok()
    }

    /// Close and drop the socket, translating the pump exit into the error
    /// reported to `on_disconnect`.
    async fn close_socket(&self, exit: &PumpExit) -> Option<String> {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }));
            let _ = tokio::time::timeout(self.config.close_timeout, async {
                let _ = sink.send(close).await;
                let _ = sink.close().await;
            })
            .await;
        }
        match exit {
            PumpExit::Cancelled | PumpExit::Closed => None,
            PumpExit::PongTimeout => Some("pong timeout".to_owned()),
            PumpExit::Transport(message) => Some(message.clone()),
        }
    }
}

async fn wait_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The connect / pump / reconnect cycle for one connection.
async fn run_loop(conn: Arc<ClientConnection>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        conn.set_state(ConnectionState::Connecting);
        let result = tokio::select! {
            () = cancel.cancelled() => return,
            result = conn.establish() => result,
        };

        match result {
            Ok(ws) => {
                let (sink, mut stream) = ws.split();
                *conn.sink.lock().await = Some(sink);
                attempt = 0;
                conn.reconnect_attempts.store(0, Ordering::Relaxed);
                conn.set_last_error(None);
                conn.set_state(ConnectionState::Connected);
                if conn.config.enable_connection_log {
                    info!(id = %conn.id, url = %conn.config.url, "connection established");
                }
                conn.events.on_connect(&conn.id, &conn.meta()).await;

                let exit = conn.pump(&mut stream, &cancel).await;
                let error = conn.close_socket(&exit).await;
                conn.set_last_error(error.clone());
                if conn.config.enable_connection_log {
                    info!(
                        id = %conn.id,
                        error = error.as_deref().unwrap_or("clean close"),
                        "connection lost"
                    );
                }
                conn.events.on_disconnect(&conn.id, error.as_deref()).await;

                if cancel.is_cancelled() {
                    return;
                }
            }
            Err(error) => {
                warn!(id = %conn.id, %error, "connect attempt failed");
                conn.set_last_error(Some(error.to_string()));
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        if !conn.config.auto_reconnect {
            conn.set_state(ConnectionState::Stopped);
            return;
        }

        attempt += 1;
        if attempt > conn.config.max_reconnect_attempts {
            warn!(
                id = %conn.id,
                attempts = attempt - 1,
                "reconnect budget exhausted, stopping"
            );
            conn.set_state(ConnectionState::Stopped);
            return;
        }
        conn.reconnect_attempts.store(attempt, Ordering::Relaxed);
        conn.set_state(ConnectionState::Reconnecting);

        let delay = reconnect_delay(
            attempt,
            conn.config.reconnect_delay,
            conn.config.max_reconnect_delay,
        );
        debug!(
            id = %conn.id,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}
