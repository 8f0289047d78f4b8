//! Durable message log
//!
//! The log is the single source of truth for chat history. It assigns every
//! accepted message a strictly increasing sequence id and enforces idempotency
//! through the client-supplied dedup token.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Session Manager / CLI commands               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               MessageLog trait  +  Replay cursor            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//!      ┌─────────────────┐         ┌─────────────────┐
//!      │     SQLite      │         │    In-memory    │
//!      │  (production)   │         │     (tests)     │
//!      └─────────────────┘         └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use murmur::storage::{MessageLog, Replay, SqliteMessageLog};
//!
//! let log = SqliteMessageLog::new("chat.db")?;
//! let outcome = log.append("hi", Some("tok-1")).await?;
//!
//! let mut replay = Replay::open(&log, 0, 256).await?;
//! while let Some(message) = replay.next().await? {
//!     println!("{}: {}", message.sequence_id, message.content);
//! }
//! ```

pub mod error;
pub mod memory;
pub mod sqlite;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{AppendOutcome, Message, SequenceId};

pub use error::{StorageError, StorageResult};
pub use memory::MemoryMessageLog;
pub use sqlite::SqliteMessageLog;

/// Default number of rows fetched per replay page
pub const DEFAULT_REPLAY_BATCH_SIZE: usize = 256;

// ============================================================================
// Log Trait
// ============================================================================

/// Append-only, idempotent message store
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a message.
    ///
    /// Returns `Duplicate` (not an error) when a message with the same
    /// non-empty token was accepted before. Empty tokens never deduplicate.
    async fn append(&self, content: &str, dedup_token: Option<&str>) -> StorageResult<AppendOutcome>;

    /// Fetch up to `limit` messages with `after < sequence_id <= upto`, ascending.
    async fn read_page(
        &self,
        after: SequenceId,
        upto: SequenceId,
        limit: usize,
    ) -> StorageResult<Vec<Message>>;

    /// Highest assigned sequence id, `0` when the log is empty
    async fn head(&self) -> StorageResult<SequenceId>;

    /// Number of stored messages
    async fn count(&self) -> StorageResult<usize>;
}

/// Thread-safe shared log handle
pub type SharedMessageLog = Arc<dyn MessageLog>;

/// Open the production SQLite log
pub fn open_sqlite_log(path: impl AsRef<Path>, busy_timeout_ms: u64) -> StorageResult<SharedMessageLog> {
    let log = SqliteMessageLog::with_busy_timeout(path, busy_timeout_ms)?;
    Ok(Arc::new(log))
}

/// Create an in-memory log
pub fn create_memory_log() -> SharedMessageLog {
    Arc::new(MemoryMessageLog::new())
}

// ============================================================================
// Replay Cursor
// ============================================================================

/// Lazy, finite read of every message after an offset.
///
/// The upper bound is the log head when the cursor is opened, so messages
/// appended during the replay are not included (they arrive live instead).
/// A cursor cannot be rewound; open a new one to read the same range again.
pub struct Replay<'a> {
    log: &'a dyn MessageLog,
    cursor: SequenceId,
    upper: SequenceId,
    batch_size: usize,
    buffer: VecDeque<Message>,
    exhausted: bool,
}

impl<'a> Replay<'a> {
    /// Open a cursor over all messages with `sequence_id > offset`
    pub async fn open(
        log: &'a dyn MessageLog,
        offset: SequenceId,
        batch_size: usize,
    ) -> StorageResult<Replay<'a>> {
        let upper = log.head().await?;
        Ok(Self {
            log,
            cursor: offset,
            upper,
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            exhausted: offset >= upper,
        })
    }

    /// Sequence id the cursor will stop at
    pub fn upper_bound(&self) -> SequenceId {
        self.upper
    }

    /// Next message, or `None` once the range is exhausted
    pub async fn next(&mut self) -> StorageResult<Option<Message>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .log
                .read_page(self.cursor, self.upper, self.batch_size)
                .await?;

            if page.len() < self.batch_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.cursor = last.sequence_id;
            }
            if self.cursor >= self.upper {
                self.exhausted = true;
            }
            self.buffer.extend(page);
        }

        Ok(self.buffer.pop_front())
    }

    /// Drain the remaining messages into a vector
    pub async fn collect_all(mut self) -> StorageResult<Vec<Message>> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await? {
            messages.push(message);
        }
        Ok(messages)
    }
}

// ============================================================================
// Tests
// ============================================================================
