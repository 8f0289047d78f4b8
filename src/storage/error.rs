//! Error types for the durable log

use thiserror::Error;

/// Result type for log operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Infrastructure failures on append or read.
///
/// A duplicate token is never reported here; see `AppendOutcome::Duplicate`.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite returned an error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to prepare the database location
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing store is not reachable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A previous holder of the connection lock panicked
    #[error("Storage lock poisoned")]
    LockPoisoned,

    /// The blocking task running the query was cancelled or panicked
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    /// Whether a retry of the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Sqlite(_) => false,
            Self::Io(_) | Self::Unavailable(_) | Self::Task(_) => true,
            Self::LockPoisoned => false,
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
