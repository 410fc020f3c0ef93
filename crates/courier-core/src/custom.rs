//! Type-keyed dispatch for custom (non-envelope) messages.
//!
//! Both the server and the client own a [`CustomHandlerTable`]. Dispatch is
//! a single lookup by the frame's `type` tag; the table is read-mostly and
//! may be populated at any time. Handler errors are logged at the dispatch
//! boundary and never propagate to the connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::meta::ConnectMeta;

/// A handler for one custom message type.
///
/// Handlers do not report delivery status; an `Err` is logged and dropped.
#[async_trait]
pub trait CustomHandler: Send + Sync {
    async fn handle(
        &self,
        payload: Value,
        meta: &ConnectMeta,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Registry mapping custom message types to handlers.
#[derive(Default)]
pub struct CustomHandlerTable {
    handlers: RwLock<HashMap<String, Arc<dyn CustomHandler>>>,
}

impl CustomHandlerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type, replacing any previous one.
    pub fn register(&self, message_type: impl Into<String>, handler: Arc<dyn CustomHandler>) {
        let message_type = message_type.into();
        debug!(message_type, "custom handler registered");
        let _ = self.handlers.write().insert(message_type, handler);
    }

    /// Remove the handler for a message type.
    pub fn unregister(&self, message_type: &str) {
        if self.handlers.write().remove(message_type).is_some() {
            debug!(message_type, "custom handler unregistered");
        }
    }

    /// Whether a handler is registered for the given type.
    #[must_use]
    pub fn contains(&self, message_type: &str) -> bool {
        self.handlers.read().contains_key(message_type)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Dispatch a custom message to its handler.
    ///
    /// Unknown types are logged and dropped. Handler errors are logged with
    /// context and swallowed.
    pub async fn dispatch(&self, message_type: &str, payload: Value, meta: &ConnectMeta) {
        let handler = self.handlers.read().get(message_type).cloned();
        match handler {
            Some(handler) => {
                if let Err(error) = handler.handle(payload, meta).await {
                    warn!(message_type, %error, "custom handler failed");
                }
            }
            None => {
                warn!(message_type, "no handler for custom message type, dropping");
            }
        }
    }
}
