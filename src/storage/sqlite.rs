//! SQLite implementation of the message log
//!
//! Sequence ids come from `AUTOINCREMENT` on the primary key, so several
//! instances may share one database file: the database write lock serializes
//! appends across connections and processes.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::error::{StorageError, StorageResult};
use super::MessageLog;
use crate::models::{normalize_token, AppendOutcome, Message, SequenceId};

/// Default time a writer waits on a locked database
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite-backed message log.
///
/// The connection sits behind a `Mutex` and every query runs on the blocking
/// thread pool so the async runtime never stalls on disk I/O.
pub struct SqliteMessageLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMessageLog {
    /// Open (or create) a log at `path`
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Open a log with a custom busy timeout
    pub fn with_busy_timeout(path: impl AsRef<Path>, busy_timeout_ms: u64) -> StorageResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL lets readers (replays) proceed while another instance appends
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;

        let log = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite message log initialized");
        Ok(log)
    }

    /// Create an in-memory log (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&guard)
        })
        .await?
    }
}

/// Create the messages table if absent
fn create_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_offset TEXT UNIQUE,
                content TEXT
            );
            "#,
    )?;
    Ok(())
}

/// Insert a row, treating a token conflict as a duplicate
fn insert_message(
    conn: &Connection,
    content: &str,
    token: Option<&str>,
) -> StorageResult<AppendOutcome> {
    let inserted = conn.execute(
        r#"
            INSERT INTO messages (content, client_offset)
            VALUES (?1, ?2)
            ON CONFLICT(client_offset) DO NOTHING
            "#,
        params![content, token],
    )?;

    if inserted == 1 {
        return Ok(AppendOutcome::Accepted {
            sequence_id: conn.last_insert_rowid(),
        });
    }

    // Only a non-null token can conflict
    let existing = conn
        .query_row(
            "SELECT id FROM messages WHERE client_offset = ?1",
            params![token],
            |row| row.get::<_, SequenceId>(0),
        )
        .optional()?;

    Ok(AppendOutcome::Duplicate { existing })
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn append(&self, content: &str, dedup_token: Option<&str>) -> StorageResult<AppendOutcome> {
        let content = content.to_string();
        let token = normalize_token(dedup_token).map(str::to_string);

        self.with_conn(move |conn| insert_message(conn, &content, token.as_deref()))
            .await
    }

    async fn read_page(
        &self,
        after: SequenceId,
        upto: SequenceId,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, client_offset, content FROM messages
                 WHERE id > ?1 AND id <= ?2
                 ORDER BY id ASC
                 LIMIT ?3",
            )?;

            let messages = stmt
                .query_map(params![after, upto, limit], |row| {
                    Ok(Message {
                        sequence_id: row.get(0)?,
                        dedup_token: row.get(1)?,
                        content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(messages)
        })
        .await
    }

    async fn head(&self) -> StorageResult<SequenceId> {
        self.with_conn(|conn| {
            let head = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM messages", [], |row| {
                row.get(0)
            })?;
            Ok(head)
        })
        .await
    }

    async fn count(&self) -> StorageResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}
