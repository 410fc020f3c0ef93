//! Courier routing server.
//!
//! Accepts long-lived WebSocket connections, authenticates them, indexes the
//! live sockets by `(user, platform, connection)`, and routes each outbound
//! envelope to every matching connection. Delivery is best-effort and
//! in-memory: if nothing matches, the envelope is dropped with a negative
//! result.
//!
//! ```no_run
//! use courier_server::{CourierServer, ServerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = CourierServer::new(ServerConfig::default())?;
//! let (addr, handle) = server.listen().await?;
//! tracing::info!(%addr, "courier server up");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod tls;

mod session;

pub use config::ServerConfig;
pub use events::{LogEvents, ServerEvents};
pub use registry::{ConnectionRecord, ConnectionRegistry, ConnectionSender, RegistryStats};
pub use server::{CourierServer, ServerStats};
pub use shutdown::ShutdownCoordinator;
