//! Connect-time metadata.
//!
//! The server assembles a [`ConnectMeta`] from the upgrade request (query
//! string, headers, peer address) before authentication; the client builds
//! one from its own connection config. It is handed to the authenticator and
//! to every lifecycle callback for the connection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata describing how a connection was (or will be) established.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectMeta {
    /// Credential presented at connect time.
    pub api_key: String,
    /// Platform tag presented at connect time.
    pub platform: String,
    /// Remote peer address, when known (server side).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    /// Request headers observed at the handshake, lowercased names.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ConnectMeta {
    /// Metadata carrying both routing coordinates.
    #[must_use]
    pub fn new(api_key: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            platform: platform.into(),
            remote_addr: None,
            headers: HashMap::new(),
        }
    }

    /// Metadata carrying only an api_key.
    ///
    /// The server's send path re-runs user extraction from the envelope's
    /// routing dimensions, where no live handshake metadata exists.
    #[must_use]
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_both_coordinates() {
        let meta = ConnectMeta::new("kA", "wechat");
        assert_eq!(meta.api_key, "kA");
        assert_eq!(meta.platform, "wechat");
        assert!(meta.remote_addr.is_none());
        assert!(meta.headers.is_empty());
    }

    #[test]
    fn from_api_key_leaves_platform_empty() {
        let meta = ConnectMeta::from_api_key("kA");
        assert_eq!(meta.api_key, "kA");
        assert!(meta.platform.is_empty());
    }

    #[test]
    fn serde_skips_empty_optionals() {
        let meta = ConnectMeta::new("k", "p");
        let value = serde_json::to_value(&meta).unwrap();
        assert!(value.get("remote_addr").is_none());
        assert!(value.get("headers").is_none());
    }
}
