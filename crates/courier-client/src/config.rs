//! Client connection configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use courier_core::CourierError;

/// TLS options for outbound connections.
#[derive(Clone, Debug)]
pub struct ClientTlsConfig {
    /// Whether to wrap the connection in TLS. Set automatically for
    /// `wss://` URLs.
    pub enabled: bool,
    /// Verify the server certificate chain.
    pub verify: bool,
    /// CA bundle to trust instead of the built-in web roots.
    pub ca_certs: Option<PathBuf>,
    /// Client certificate chain for mutual TLS.
    pub certfile: Option<PathBuf>,
    /// Client private key for mutual TLS.
    pub keyfile: Option<PathBuf>,
    /// Verify that the certificate matches the host name.
    pub check_hostname: bool,
}

impl Default for ClientTlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify: true,
            ca_certs: None,
            certfile: None,
            keyfile: None,
            check_hostname: true,
        }
    }
}

/// Configuration for one outbound connection.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` URL of the server endpoint.
    pub url: String,
    /// Credential bound to this connection.
    pub api_key: String,
    /// Platform tag bound to this connection.
    pub platform: String,
    /// Extra headers sent with the handshake.
    pub headers: HashMap<String, String>,
    /// Reconnect automatically after transport failures.
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up (state `Stopped`).
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt; doubles per attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Heartbeat ping cadence.
    pub ping_interval: Duration,
    /// How long to wait for a pong before declaring the link dead.
    pub ping_timeout: Duration,
    /// Bound on the closing handshake at disconnect.
    pub close_timeout: Duration,
    /// Emit a log line per connect/disconnect.
    pub enable_connection_log: bool,
    /// Emit a log line per routed message.
    pub enable_message_log: bool,
    /// TLS options; mirrors the server set.
    pub tls: ClientTlsConfig,
}

impl ConnectionConfig {
    /// Build a config for a URL. `wss://` implies TLS.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        let url = url.into();
        let tls = ClientTlsConfig {
            enabled: url.starts_with("wss://"),
            ..ClientTlsConfig::default()
        };
        Self {
            url,
            api_key: api_key.into(),
            platform: platform.into(),
            headers: HashMap::new(),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(10),
            enable_connection_log: true,
            enable_message_log: true,
            tls: ClientTlsConfig::default(),
        }
        .with_tls(tls)
    }

    /// Build a config from host, port, and path.
    #[must_use]
    pub fn from_parts(
        host: &str,
        port: u16,
        path: &str,
        api_key: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self::new(format!("ws://{host}:{port}{path}"), api_key, platform)
    }

    /// Replace the TLS options.
    #[must_use]
    pub fn with_tls(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Validate the configuration. Errors here are fatal at
    /// `add_connection` time.
    pub fn validate(&self) -> Result<(), CourierError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(CourierError::config(format!(
                "url must start with ws:// or wss://, got {:?}",
                self.url
            )));
        }
        if self.api_key.is_empty() {
            return Err(CourierError::config("api_key must not be empty"));
        }
        if self.platform.is_empty() {
            return Err(CourierError::config("platform must not be empty"));
        }
        if self.ping_interval.is_zero() {
            return Err(CourierError::config("ping_interval must be positive"));
        }
        Ok(())
    }

    /// The connect URL with the credential query parameters appended.
    pub(crate) fn request_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}api_key={}&platform={}",
            self.url, separator, self.api_key, self.platform
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_defaults() {
        let cfg = ConnectionConfig::new("ws://localhost:18040/ws", "kA", "wechat");
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.max_reconnect_attempts, 5);
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(1));
        assert_eq!(cfg.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(cfg.ping_interval, Duration::from_secs(20));
        assert!(!cfg.tls.enabled);
    }

    #[test]
    fn wss_url_implies_tls() {
        let cfg = ConnectionConfig::new("wss://example.com/ws", "kA", "wechat");
        assert!(cfg.tls.enabled);
        assert!(cfg.tls.verify);
        assert!(cfg.tls.check_hostname);
    }

    #[test]
    fn from_parts_builds_plain_url() {
        let cfg = ConnectionConfig::from_parts("localhost", 18040, "/ws", "kA", "qq");
        assert_eq!(cfg.url, "ws://localhost:18040/ws");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_scheme() {
        let cfg = ConnectionConfig::new("http://localhost/ws", "kA", "wechat");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_credentials() {
        assert!(ConnectionConfig::new("ws://h/ws", "", "wechat")
            .validate()
            .is_err());
        assert!(ConnectionConfig::new("ws://h/ws", "kA", "")
            .validate()
            .is_err());
    }

    #[test]
    fn request_url_appends_query() {
        let cfg = ConnectionConfig::new("ws://h:1/ws", "kA", "wechat");
        assert_eq!(cfg.request_url(), "ws://h:1/ws?api_key=kA&platform=wechat");
    }

    #[test]
    fn request_url_extends_existing_query() {
        let cfg = ConnectionConfig::new("ws://h:1/ws?v=2", "kA", "wechat");
        assert_eq!(
            cfg.request_url(),
            "ws://h:1/ws?v=2&api_key=kA&platform=wechat"
        );
    }
}
