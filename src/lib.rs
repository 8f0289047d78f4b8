//! murmur - durable chat broadcast and recovery
//!
//! Every chat message is appended to a durable, totally ordered log before it
//! is broadcast. Retries carrying the same dedup token are absorbed by the log,
//! reconnecting clients replay what they missed by sequence id, and messages
//! accepted on one instance reach clients connected to every other instance
//! through a shared broadcast bus.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`storage`] - Durable message log (SQLite, in-memory) and replay cursor
//! - [`coordinator`] - Connection hub, broadcast bus (local, Redis) and relay
//! - [`session`] - Per-client lifecycle: handshake, replay, submit, disconnect
//! - [`gateway`] - WebSocket gateway, JSON wire protocol, health and metrics
//! - [`cluster`] - Instance assembly and the in-process multi-instance launcher
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use murmur::cluster::{Node, NodeOptions};
//! use murmur::config::Config;
//! use murmur::coordinator::connect_bus;
//! use murmur::storage::open_sqlite_log;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let log = open_sqlite_log(&config.storage.sqlite_path, config.storage.busy_timeout_ms)?;
//!     let bus = connect_bus(&config.coordinator).await?;
//!     let node = Node::start(
//!         config.server.clone(),
//!         log,
//!         Arc::clone(&bus),
//!         NodeOptions::from_config(&config),
//!     );
//!     node.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod models;
pub mod session;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{Cluster, Node};
    pub use crate::config::Config;
    pub use crate::coordinator::{BroadcastBus, BroadcastCoordinator, ConnectionHub, LocalBus};
    pub use crate::error::{Error, ErrorCategory, MurmurErrorTrait, Result};
    pub use crate::models::{AckReceipt, AppendOutcome, Delivery, Handshake, Message, SequenceId};
    pub use crate::session::{Session, SessionManager};
    pub use crate::storage::{MessageLog, Replay, SharedMessageLog};
}

// Direct re-exports for convenience
pub use models::{AppendOutcome, Delivery, Message, SequenceId};
