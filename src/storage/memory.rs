//! In-memory message log
//!
//! Useful for testing without database dependencies. Supports a simulated
//! outage so callers can exercise their `StorageError` paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use super::MessageLog;
use crate::models::{normalize_token, AppendOutcome, Message, SequenceId};

#[derive(Default)]
struct Inner {
    messages: Vec<Message>,
    tokens: HashMap<String, SequenceId>,
    next_id: SequenceId,
}

/// Process-local message log
pub struct MemoryMessageLog {
    inner: RwLock<Inner>,
    available: AtomicBool,
}

impl MemoryMessageLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                ..Default::default()
            }),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Get the number of stored messages
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.messages.len()).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("in-memory log marked unavailable".to_string()))
        }
    }
}

impl Default for MemoryMessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn append(&self, content: &str, dedup_token: Option<&str>) -> StorageResult<AppendOutcome> {
        self.check_available()?;

        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let token = normalize_token(dedup_token);

        if let Some(token) = token {
            if let Some(existing) = inner.tokens.get(token) {
                return Ok(AppendOutcome::Duplicate {
                    existing: Some(*existing),
                });
            }
        }

        let sequence_id = inner.next_id;
        inner.next_id += 1;
        if let Some(token) = token {
            inner.tokens.insert(token.to_string(), sequence_id);
        }
        inner.messages.push(Message {
            sequence_id,
            dedup_token: token.map(str::to_string),
            content: content.to_string(),
        });

        Ok(AppendOutcome::Accepted { sequence_id })
    }

    async fn read_page(
        &self,
        after: SequenceId,
        upto: SequenceId,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        self.check_available()?;

        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        // Ids are dense and start at 1, so `after` is also the slice index
        let start = usize::try_from(after.max(0)).unwrap_or(usize::MAX);

        Ok(inner
            .messages
            .iter()
            .skip(start)
            .take_while(|m| m.sequence_id <= upto)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn head(&self) -> StorageResult<SequenceId> {
        self.check_available()?;
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.next_id - 1)
    }

    async fn count(&self) -> StorageResult<usize> {
        self.check_available()?;
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.messages.len())
    }
}
