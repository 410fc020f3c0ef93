//! Server configuration.

use std::path::PathBuf;

use courier_core::CourierError;
use serde::{Deserialize, Serialize};

/// Configuration for [`crate::CourierServer`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// WebSocket upgrade path (default `"/ws"`).
    pub path: String,
    /// Whether to terminate TLS.
    pub ssl_enabled: bool,
    /// PEM certificate chain path (required when `ssl_enabled`).
    pub ssl_certfile: Option<PathBuf>,
    /// PEM private key path (required when `ssl_enabled`).
    pub ssl_keyfile: Option<PathBuf>,
    /// CA bundle for client-certificate verification.
    pub ssl_ca_certs: Option<PathBuf>,
    /// Require and verify client certificates.
    pub ssl_verify: bool,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Bound on draining in-flight work at shutdown, in seconds.
    pub close_timeout_secs: u64,
    /// Emit a log line per connect/disconnect.
    pub enable_connection_log: bool,
    /// Emit a log line per routed message.
    pub enable_message_log: bool,
    /// Track and expose per-server counters.
    pub enable_stats: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/ws".into(),
            ssl_enabled: false,
            ssl_certfile: None,
            ssl_keyfile: None,
            ssl_ca_certs: None,
            ssl_verify: false,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            close_timeout_secs: 10,
            enable_connection_log: true,
            enable_message_log: true,
            enable_stats: true,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration. Errors here are fatal at startup.
    pub fn validate(&self) -> Result<(), CourierError> {
        if !self.path.starts_with('/') {
            return Err(CourierError::config(format!(
                "path must start with '/', got {:?}",
                self.path
            )));
        }
        if self.ssl_enabled {
            if self.ssl_certfile.is_none() {
                return Err(CourierError::config("ssl_enabled requires ssl_certfile"));
            }
            if self.ssl_keyfile.is_none() {
                return Err(CourierError::config("ssl_enabled requires ssl_keyfile"));
            }
        }
        Ok(())
    }
}
