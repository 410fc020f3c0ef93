//! Courier routing client.
//!
//! A [`CourierClient`] supervises a pool of outbound WebSocket connections,
//! each bound to a fixed `(url, api_key, platform)` triple. Outgoing
//! envelopes are dispatched onto the best-matching connected socket by
//! strict priority: exact `(api_key, platform)` match, then api_key match,
//! then platform match, earliest-added winning ties.
//!
//! Each connection keeps itself alive with ping/pong heartbeats and
//! reconnects with exponential backoff after transport failures, giving up
//! (state `Stopped`) once the attempt budget is spent.
//!
//! ```no_run
//! use courier_client::{ConnectionConfig, CourierClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CourierClient::new();
//! let id = client.add_connection(ConnectionConfig::new(
//!     "ws://localhost:18040/ws",
//!     "my-api-key",
//!     "wechat",
//! ))?;
//! client.connect_to(&id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod events;
pub mod select;
pub mod supervisor;

mod tls;

pub use config::{ClientTlsConfig, ConnectionConfig};
pub use connection::{ClientConnection, ConnectionState};
pub use events::{ClientEvents, LogEvents};
pub use supervisor::{ConnectionInfo, CourierClient};
