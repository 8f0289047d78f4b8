//! Client-facing WebSocket gateway
//!
//! Translates WebSocket traffic into session calls: the handshake query
//! becomes a [`Handshake`](crate::models::Handshake), `chat-message` frames
//! become submissions, and queued [`Outbound`](crate::models::Outbound)
//! events become server frames.
//!
//! # Usage
//!
//! ```ignore
//! use murmur::gateway::GatewayServer;
//!
//! let server = GatewayServer::new(config.server.clone(), sessions);
//! server.start_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod api;
pub mod error;
pub mod protocol;
pub mod server;

// Re-export main types
pub use api::{create_router, ConnectParams, HealthResponse};
pub use error::ServerError;
pub use protocol::{ClientFrame, ServerFrame};
pub use server::{AppState, GatewayServer, ServerInfo};
