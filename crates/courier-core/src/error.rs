//! Shared error taxonomy.
//!
//! Errors are grouped by where they recover:
//!
//! - [`CourierError::Handshake`] rejects a connection before registration;
//! - [`CourierError::Malformed`] is logged and the frame skipped;
//! - [`CourierError::Unroutable`] yields an empty send result, no exception;
//! - [`CourierError::Transport`] unregisters the dead connection (server) or
//!   moves the connection to Reconnecting (client);
//! - [`CourierError::Callback`] is caught at the dispatch boundary;
//! - [`CourierError::Shutdown`] fails new work fast once stop was requested;
//! - [`CourierError::Config`] / [`CourierError::Tls`] are fatal at startup.

use thiserror::Error;

use crate::auth::AuthError;
use crate::wire::WireError;

/// Top-level error type shared by the server and client crates.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The auth predicate returned false or the user extractor failed.
    #[error("handshake rejected: {0}")]
    Handshake(#[from] AuthError),

    /// JSON parse or wire shape check failed.
    #[error("malformed frame: {0}")]
    Malformed(#[from] WireError),

    /// Missing routing dimensions or no matching live connection.
    #[error("unroutable envelope: {reason}")]
    Unroutable { reason: String },

    /// A socket read or write failed mid-session.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// An application hook raised; isolated at the dispatch boundary.
    #[error("callback error in {context}: {message}")]
    Callback { context: String, message: String },

    /// New work submitted after stop was requested.
    #[error("shutdown in progress")]
    Shutdown,

    /// Invalid configuration; fatal at startup.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// TLS credential loading or validation failed; fatal at startup.
    #[error("tls error: {message}")]
    Tls { message: String },
}

impl CourierError {
    #[must_use]
    pub fn unroutable(reason: impl Into<String>) -> Self {
        Self::Unroutable {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn callback(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Callback {
            context: context.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_converts_to_handshake() {
        let err: CourierError = AuthError::new("bad key").into();
        assert!(matches!(err, CourierError::Handshake(_)));
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn wire_error_converts_to_malformed() {
        let wire = serde_json::from_str::<serde_json::Value>("{")
            .map_err(WireError::from)
            .unwrap_err();
        let err: CourierError = wire.into();
        assert!(matches!(err, CourierError::Malformed(_)));
    }

    #[test]
    fn display_carries_context() {
        let err = CourierError::callback("on_message", "handler panicked");
        assert_eq!(
            err.to_string(),
            "callback error in on_message: handler panicked"
        );
    }

    #[test]
    fn unroutable_constructor() {
        let err = CourierError::unroutable("empty api_key");
        assert!(err.to_string().contains("empty api_key"));
    }

    #[test]
    fn error_is_std_error() {
        let err = CourierError::Shutdown;
        let _: &dyn std::error::Error = &err;
    }
}
