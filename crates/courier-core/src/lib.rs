//! Core types for the courier message-routing protocol.
//!
//! A courier deployment has two halves: a server that indexes long-lived
//! WebSocket connections by `(user, platform, connection)` and routes each
//! envelope to every matching socket, and a client that supervises a pool of
//! outbound connections and picks the best one for each outgoing envelope.
//! This crate holds everything both halves share:
//!
//! - [`Envelope`]: the routed message record and its wire representation
//! - [`WireFrame`]: classification of incoming text frames
//! - [`ConnectMeta`]: connect-time metadata (credentials, headers, peer addr)
//! - [`Authenticator`]: the pluggable auth / user-extraction seam
//! - [`CustomHandlerTable`]: type-keyed dispatch for non-envelope messages
//! - [`reconnect_delay`]: the exponential backoff used by reconnecting clients
//! - [`CourierError`]: the shared error taxonomy

pub mod auth;
pub mod backoff;
pub mod custom;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod meta;
pub mod wire;

pub use auth::{ApiKeyIdentity, Authenticator};
pub use backoff::reconnect_delay;
pub use custom::{CustomHandler, CustomHandlerTable};
pub use envelope::{Envelope, MessageDim, MessageInfo, Segment};
pub use error::CourierError;
pub use ids::{ConnectionId, UserId};
pub use meta::ConnectMeta;
pub use wire::{decode_frame, CustomMessage, WireFrame};
