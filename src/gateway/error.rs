//! Gateway server errors

use std::io;
use thiserror::Error;

/// Errors starting or running the gateway
#[derive(Error, Debug)]
pub enum ServerError {
    /// Host/port do not form a socket address
    #[error("Invalid bind address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Failed to bind to address
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The accept loop failed
    #[error("Serve failed: {0}")]
    Serve(#[source] io::Error),
}

impl ServerError {
    /// Whether starting again later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidAddress { .. } => false,
            Self::Bind { source, .. } => source.kind() == io::ErrorKind::AddrInUse,
            Self::Serve(_) => true,
        }
    }
}
