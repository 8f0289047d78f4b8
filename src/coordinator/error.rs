//! Error types for the broadcast coordinator

use thiserror::Error;

use super::config::ConfigError;

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Failures of the cross-instance relay.
///
/// None of these affect local delivery; publish degrades to local-only.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// The bus could not be reached
    #[error("Coordinator unreachable: {0}")]
    Unreachable(String),

    /// Redis returned an error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Could not obtain a pooled connection
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Envelope could not be encoded or decoded
    #[error("Envelope encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid coordinator configuration: {0}")]
    Config(#[from] ConfigError),
}

impl CoordinatorError {
    /// Whether retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Pool(_) => true,
            Self::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            Self::Encoding(_) | Self::Config(_) => false,
        }
    }
}

impl From<deadpool_redis::PoolError> for CoordinatorError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
