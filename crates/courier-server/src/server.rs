//! `CourierServer` — axum HTTP + WebSocket endpoint and the send/broadcast
//! API.
//!
//! The accept pipeline runs entirely before the protocol upgrade: metadata is
//! parsed from the query string and headers, the authenticator is consulted,
//! and rejected handshakes never produce a socket. Accepted connections are
//! registered and then driven by [`crate::session`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::serve::ListenerExt;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use courier_core::wire::{self, CustomMessage};
use courier_core::{
    ApiKeyIdentity, Authenticator, ConnectMeta, ConnectionId, CourierError, CustomHandler,
    CustomHandlerTable, Envelope, UserId,
};

use crate::config::ServerConfig;
use crate::events::{LogEvents, ServerEvents};
use crate::registry::{
    BoxError, BoxSink, ConnectionRecord, ConnectionRegistry, ConnectionSender, RegistryStats,
    RouteTarget,
};
use crate::session::{self, SessionContext};
use crate::shutdown::ShutdownCoordinator;
use crate::tls::{self, TlsListener};

/// Per-server counters, exposed through [`CourierServer::stats`].
#[derive(Debug, Default)]
pub struct StatsCounters {
    auth_requests: AtomicU64,
    auth_failures: AtomicU64,
    messages_received: AtomicU64,
    custom_received: AtomicU64,
    malformed_frames: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_auth_request(&self) {
        let _ = self.auth_requests.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_auth_failure(&self) {
        let _ = self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_message(&self) {
        let _ = self.messages_received.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_custom(&self) {
        let _ = self.custom_received.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn record_malformed(&self) {
        let _ = self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of server and registry counters.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ServerStats {
    pub users: usize,
    pub connections: usize,
    pub auth_requests: u64,
    pub auth_failures: u64,
    pub messages_received: u64,
    pub custom_received: u64,
    pub malformed_frames: u64,
}

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<ConnectionRegistry>,
    authenticator: Arc<dyn Authenticator>,
    events: Arc<dyn ServerEvents>,
    custom: Arc<CustomHandlerTable>,
    stats: Arc<StatsCounters>,
    config: ServerConfig,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

/// The courier routing server.
pub struct CourierServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    authenticator: Arc<dyn Authenticator>,
    events: Arc<dyn ServerEvents>,
    custom: Arc<CustomHandlerTable>,
    stats: Arc<StatsCounters>,
    shutdown: Arc<ShutdownCoordinator>,
    tls: Option<Arc<rustls::ServerConfig>>,
    start_time: Instant,
}

impl CourierServer {
    /// Create a server. Configuration and TLS credential problems are fatal
    /// here, before anything binds.
    pub fn new(config: ServerConfig) -> Result<Self, CourierError> {
        config.validate()?;
        let tls = if config.ssl_enabled {
            Some(tls::load_server_tls(&config)?)
        } else {
            None
        };
        Ok(Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            authenticator: Arc::new(ApiKeyIdentity),
            events: Arc::new(LogEvents),
            custom: Arc::new(CustomHandlerTable::new()),
            stats: Arc::new(StatsCounters::default()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            tls,
            start_time: Instant::now(),
        })
    }

    /// Replace the authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Replace the lifecycle event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn ServerEvents>) -> Self {
        self.events = events;
        self
    }

    /// Register a handler for a custom message type.
    pub fn register_custom_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn CustomHandler>,
    ) {
        self.custom.register(message_type, handler);
    }

    /// Remove a custom message handler.
    pub fn unregister_custom_handler(&self, message_type: &str) {
        self.custom.unregister(message_type);
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registry and counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        let RegistryStats { users, connections } = self.registry.stats();
        ServerStats {
            users,
            connections,
            auth_requests: self.stats.auth_requests.load(Ordering::Relaxed),
            auth_failures: self.stats.auth_failures.load(Ordering::Relaxed),
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            custom_received: self.stats.custom_received.load(Ordering::Relaxed),
            malformed_frames: self.stats.malformed_frames.load(Ordering::Relaxed),
        }
    }

    /// Build the axum router.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            authenticator: self.authenticator.clone(),
            events: self.events.clone(),
            custom: self.custom.clone(),
            stats: self.stats.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route(&self.config.path, get(ws_upgrade_handler))
            .with_state(state)
            .layer(CatchPanicLayer::new())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve. Returns the bound address and the serve task handle.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), CourierError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| CourierError::config(format!("bind {addr}: {e}")))?;
        let bound = listener
            .local_addr()
            .map_err(|e| CourierError::config(e.to_string()))?;

        let service = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        let handle = if let Some(tls_config) = &self.tls {
            let tls_listener =
                TlsListener::new(listener, TlsAcceptor::from(tls_config.clone())).tap_io(|_io| {});
            tokio::spawn(async move {
                let _ = axum::serve(tls_listener, service)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await;
            })
        } else {
            tokio::spawn(async move {
                let _ = axum::serve(listener, service)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await;
            })
        };

        info!(
            addr = %bound,
            path = %self.config.path,
            tls = self.tls.is_some(),
            "courier server started"
        );
        Ok((bound, handle))
    }

    /// Stop accepting, close every session with 1001, and drain within
    /// `close_timeout_secs`.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>) {
        self.shutdown
            .graceful_shutdown(handles, Duration::from_secs(self.config.close_timeout_secs))
            .await;
    }

    /// Route an envelope to every connection matching its routing
    /// dimensions, optionally overriding the platform.
    ///
    /// Returns per-uuid delivery results; an empty map means the envelope
    /// was unroutable or nothing matched.
    pub async fn send_message(
        &self,
        envelope: &Envelope,
        platform_override: Option<&str>,
    ) -> HashMap<ConnectionId, bool> {
        if self.shutdown.is_shutting_down() {
            warn!("send_message after shutdown requested, dropping");
            return HashMap::new();
        }

        let api_key = envelope.api_key();
        let platform = platform_override.unwrap_or_else(|| envelope.platform());
        if api_key.is_empty() || platform.is_empty() {
            warn!(
                api_key_empty = api_key.is_empty(),
                platform_empty = platform.is_empty(),
                "unroutable envelope: missing routing dimensions"
            );
            return HashMap::new();
        }

        let user_id = match self
            .authenticator
            .extract_user(&ConnectMeta::from_api_key(api_key))
            .await
        {
            Ok(user_id) => user_id,
            Err(error) => {
                warn!(%error, "unroutable envelope: user extraction failed");
                return HashMap::new();
            }
        };

        let targets = self.registry.lookup(&user_id, platform);
        if targets.is_empty() {
            debug!(%user_id, platform, "no live connection for envelope");
            return HashMap::new();
        }

        let Ok(text) = wire::encode_envelope(envelope) else {
            warn!("envelope serialization failed");
            return HashMap::new();
        };
        self.fan_out(targets, &text).await
    }

    /// Send a custom message, broadcasting across any omitted dimension:
    /// all platforms of a user, all users on a platform, or every
    /// connection when both targets are omitted.
    pub async fn send_custom_message(
        &self,
        message_type: &str,
        payload: Value,
        target_user: Option<&str>,
        target_platform: Option<&str>,
    ) -> HashMap<ConnectionId, bool> {
        if self.shutdown.is_shutting_down() {
            warn!("send_custom_message after shutdown requested, dropping");
            return HashMap::new();
        }

        let targets = match (target_user, target_platform) {
            (Some(user), Some(platform)) => {
                self.registry.lookup(&UserId::from(user), platform)
            }
            (Some(user), None) => self.registry.user_snapshot(&UserId::from(user)),
            (None, Some(platform)) => self.registry.platform_snapshot(platform),
            (None, None) => self.registry.snapshot_all(),
        };
        if targets.is_empty() {
            return HashMap::new();
        }

        let message = CustomMessage {
            message_type: message_type.to_owned(),
            payload,
            target_user: target_user.map(str::to_owned),
            target_platform: target_platform.map(str::to_owned),
            extra: serde_json::Map::new(),
        };
        let Ok(text) = wire::encode_custom(&message) else {
            warn!(message_type, "custom message serialization failed");
            return HashMap::new();
        };
        self.fan_out(targets, &text).await
    }

    /// Fan an envelope out to every live connection, optionally filtered by
    /// platform, independent of its routing dimensions.
    pub async fn broadcast_message(
        &self,
        envelope: &Envelope,
        platform: Option<&str>,
    ) -> HashMap<ConnectionId, bool> {
        if self.shutdown.is_shutting_down() {
            warn!("broadcast_message after shutdown requested, dropping");
            return HashMap::new();
        }

        let targets = match platform {
            Some(platform) => self.registry.platform_snapshot(platform),
            None => self.registry.snapshot_all(),
        };
        if targets.is_empty() {
            return HashMap::new();
        }

        let Ok(text) = wire::encode_envelope(envelope) else {
            warn!("envelope serialization failed");
            return HashMap::new();
        };
        self.fan_out(targets, &text).await
    }

    /// Deliver one serialized frame to each target in parallel. A failed
    /// write marks that uuid `false` and unregisters the dead socket;
    /// other recipients are unaffected.
    async fn fan_out(&self, targets: Vec<RouteTarget>, text: &str) -> HashMap<ConnectionId, bool> {
        let sends = targets.into_iter().map(|target| async move {
            let ok = target.sender.send_text(text).await.is_ok();
            (target.uuid, ok)
        });
        let results: HashMap<ConnectionId, bool> =
            futures::future::join_all(sends).await.into_iter().collect();

        for (uuid, ok) in &results {
            if !ok && self.registry.unregister(uuid).is_some() {
                warn!(%uuid, "write failed, connection unregistered");
            }
        }

        let delivered = results.values().filter(|ok| **ok).count();
        debug!(delivered, total = results.len(), "fan-out complete");
        results
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.registry.stats();
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "users": stats.users,
        "connections": stats.connections,
    }))
}

/// GET on the configured WS path — the accept pipeline.
async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    if state.shutdown.is_shutting_down() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let meta = build_meta(&params, &headers, remote);
    state.stats.record_auth_request();

    // Both routing dimensions are required to register the connection.
    if meta.platform.is_empty() {
        state.stats.record_auth_failure();
        warn!(remote = %remote, "handshake missing platform parameter");
        return Err(StatusCode::BAD_REQUEST);
    }

    if !state.authenticator.authenticate(&meta).await {
        state.stats.record_auth_failure();
        warn!(remote = %remote, "handshake rejected by authenticator");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user_id = match state.authenticator.extract_user(&meta).await {
        Ok(user_id) => user_id,
        Err(error) => {
            state.stats.record_auth_failure();
            warn!(remote = %remote, %error, "user extraction failed");
            return Err(StatusCode::FORBIDDEN);
        }
    };

    let uuid = ConnectionId::new();
    let max_message_size = state.config.max_message_size;
    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, uuid, user_id, meta, state))
        .into_response())
}

async fn handle_socket(
    socket: axum::extract::ws::WebSocket,
    uuid: ConnectionId,
    user_id: UserId,
    meta: ConnectMeta,
    state: AppState,
) {
    let (sink, stream) = socket.split();
    let sink: BoxSink = Box::new(sink.sink_map_err(|e| Box::new(e) as BoxError));
    let sender = ConnectionSender::new(sink);

    let record = Arc::new(ConnectionRecord::new(uuid.clone(), user_id, meta));
    state.registry.register(record.clone(), sender.clone());

    if state.config.enable_connection_log {
        info!(
            %uuid,
            user_id = %record.user_id,
            platform = %record.platform,
            remote = record.remote_addr.as_deref().unwrap_or("unknown"),
            "connection registered"
        );
    }
    state.events.on_connect(&uuid, &record.meta).await;

    let ctx = SessionContext {
        registry: state.registry.clone(),
        events: state.events.clone(),
        custom: state.custom.clone(),
        stats: state.stats.clone(),
        config: state.config.clone(),
        shutdown: state.shutdown.token(),
    };
    session::run_session(stream, sender, record, ctx).await;
}

fn build_meta(
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    remote: SocketAddr,
) -> ConnectMeta {
    // The query parameter is preferred; the x-apikey header is the
    // fallback for clients that cannot set query strings.
    let api_key = params
        .get("api_key")
        .cloned()
        .filter(|key| !key.is_empty())
        .or_else(|| {
            headers
                .get("x-apikey")
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        })
        .unwrap_or_default();
    let platform = params.get("platform").cloned().unwrap_or_default();

    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect();

    ConnectMeta {
        api_key,
        platform,
        remote_addr: Some(remote.to_string()),
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_core::auth::AuthError;
    use courier_core::envelope::{MessageDim, MessageInfo, Segment};

    fn envelope(api_key: &str, platform: &str) -> Envelope {
        Envelope::new(
            MessageInfo::now(platform, "m1"),
            Segment::text("hi"),
            MessageDim::new(api_key, platform),
        )
    }

    #[test]
    fn new_with_default_config() {
        let server = CourierServer::new(ServerConfig::default()).unwrap();
        assert_eq!(server.config().path, "/ws");
        assert_eq!(server.stats().connections, 0);
    }

    #[test]
    fn new_rejects_bad_path() {
        let config = ServerConfig {
            path: "ws".into(),
            ..ServerConfig::default()
        };
        assert!(CourierServer::new(config).is_err());
    }

    #[test]
    fn new_rejects_tls_without_credentials() {
        let config = ServerConfig {
            ssl_enabled: true,
            ..ServerConfig::default()
        };
        assert!(matches!(
            CourierServer::new(config),
            Err(CourierError::Config { .. })
        ));
    }

    #[test]
    fn new_rejects_missing_tls_files() {
        let config = ServerConfig {
            ssl_enabled: true,
            ssl_certfile: Some("/nonexistent/cert.pem".into()),
            ssl_keyfile: Some("/nonexistent/key.pem".into()),
            ..ServerConfig::default()
        };
        assert!(matches!(
            CourierServer::new(config),
            Err(CourierError::Tls { .. })
        ));
    }

    #[tokio::test]
    async fn send_message_with_empty_api_key_is_unroutable() {
        let server = CourierServer::new(ServerConfig::default()).unwrap();
        let results = server.send_message(&envelope("", "wechat"), None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn send_message_with_empty_platform_is_unroutable() {
        let server = CourierServer::new(ServerConfig::default()).unwrap();
        let results = server.send_message(&envelope("kA", ""), None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn platform_override_replaces_empty_dim() {
        // Override supplies the platform; still no live connection, so the
        // result is empty but not a routing error path.
        let server = CourierServer::new(ServerConfig::default()).unwrap();
        let results = server
            .send_message(&envelope("kA", ""), Some("wechat"))
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn send_message_unknown_user_is_empty() {
        let server = CourierServer::new(ServerConfig::default()).unwrap();
        let results = server.send_message(&envelope("kA", "wechat"), None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn send_message_with_failing_extractor_is_empty() {
        struct Refusing;

        #[async_trait]
        impl Authenticator for Refusing {
            async fn extract_user(&self, _meta: &ConnectMeta) -> Result<UserId, AuthError> {
                Err(AuthError::new("no such account"))
            }
        }

        let server = CourierServer::new(ServerConfig::default())
            .unwrap()
            .with_authenticator(Arc::new(Refusing));
        let results = server.send_message(&envelope("kA", "wechat"), None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn sends_fail_fast_after_shutdown() {
        let server = CourierServer::new(ServerConfig::default()).unwrap();
        server.shutdown().shutdown();
        assert!(server
            .send_message(&envelope("kA", "wechat"), None)
            .await
            .is_empty());
        assert!(server
            .send_custom_message("t", Value::Null, None, None)
            .await
            .is_empty());
        assert!(server
            .broadcast_message(&envelope("kA", "wechat"), None)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn listen_binds_and_serves_health() {
        let server = CourierServer::new(ServerConfig::default()).unwrap();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        let body: Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);

        server.graceful_shutdown(vec![handle]).await;
    }

    #[tokio::test]
    async fn shutdown_stops_serving() {
        let server = CourierServer::new(ServerConfig::default()).unwrap();
        let (addr, handle) = server.listen().await.unwrap();

        server.graceful_shutdown(vec![handle]).await;
        assert!(reqwest::get(format!("http://{addr}/health")).await.is_err());
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let first = CourierServer::new(ServerConfig::default()).unwrap();
        let (addr, handle) = first.listen().await.unwrap();

        let second = CourierServer::new(ServerConfig {
            port: addr.port(),
            ..ServerConfig::default()
        })
        .unwrap();
        assert!(matches!(
            second.listen().await,
            Err(CourierError::Config { .. })
        ));

        first.graceful_shutdown(vec![handle]).await;
    }

    #[test]
    fn custom_handler_registration_roundtrip() {
        struct Nop;

        #[async_trait]
        impl CustomHandler for Nop {
            async fn handle(
                &self,
                _payload: Value,
                _meta: &ConnectMeta,
            ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
                Ok(())
            }
        }

        let server = CourierServer::new(ServerConfig::default()).unwrap();
        server.register_custom_handler("sync", Arc::new(Nop));
        server.unregister_custom_handler("sync");
    }
}
