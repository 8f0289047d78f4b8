//! Unified error handling for the murmur crate
//!
//! Each domain keeps its own error enum (`StorageError`, `CoordinatorError`,
//! `ServerError`); this module wraps them in a single `Error` for code that
//! crosses module boundaries.
//!
//! # Architecture
//!
//! - [`MurmurErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use murmur::error::{Error, MurmurErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Retrying: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::coordinator::error::CoordinatorError;
pub use crate::gateway::error::ServerError;
pub use crate::storage::error::StorageError;

/// Common trait for all murmur error types
pub trait MurmurErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Durable log and other I/O
    Storage,
    /// Cross-instance bus
    Coordination,
    /// Client-facing transport
    Network,
    /// Malformed data on the wire
    Protocol,
    /// Configuration and validation errors
    Config,
}

impl ErrorCategory {
    /// Label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Coordination => "coordination",
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::Config => "config",
        }
    }
}

/// Unified error type for the murmur crate
#[derive(Error, Debug)]
pub enum Error {
    /// Durable log errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Broadcast bus errors
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Gateway errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MurmurErrorTrait for StorageError {
    fn is_recoverable(&self) -> bool {
        StorageError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

impl MurmurErrorTrait for CoordinatorError {
    fn is_recoverable(&self) -> bool {
        CoordinatorError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::Encoding(_) => ErrorCategory::Protocol,
            _ => ErrorCategory::Coordination,
        }
    }
}

impl MurmurErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Storage(e) => MurmurErrorTrait::is_recoverable(e),
            Self::Coordinator(e) => MurmurErrorTrait::is_recoverable(e),
            Self::Server(e) => e.is_recoverable(),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage(e) => e.category(),
            Self::Coordinator(e) => e.category(),
            Self::Server(ServerError::InvalidAddress { .. }) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Network,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Protocol,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
