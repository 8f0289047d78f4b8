//! Connections attached to this instance
//!
//! The hub owns one [`ClientConnection`] per connected client and performs
//! local fan-out. A connection that is still replaying history buffers live
//! messages instead of sending them, so a client never sees a live message
//! before the replayed messages that precede it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};

use crate::models::{Delivery, Outbound, SequenceId};

// ============================================================================
// Client Connection
// ============================================================================

/// Delivery phase of a connection
#[derive(Debug)]
enum Phase {
    /// Replay in progress; live messages wait here
    Replaying { pending: Vec<Delivery> },

    /// Receiving live messages directly
    Live,

    /// Disconnected; everything is discarded
    Closed,
}

/// A client attached to this instance
pub struct ClientConnection {
    /// Unique connection ID
    pub id: String,

    /// Send channel to the client's write task
    tx: mpsc::Sender<Outbound>,

    phase: Mutex<Phase>,

    /// When this connection was established
    pub connected_at: Instant,

    /// Count of live messages dropped due to a full channel
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection that receives live messages immediately
    pub fn live(id: impl Into<String>, tx: mpsc::Sender<Outbound>) -> Self {
        Self::with_phase(id.into(), tx, Phase::Live)
    }

    /// Create a connection that holds live messages until `finish_replay`
    pub fn replaying(id: impl Into<String>, tx: mpsc::Sender<Outbound>) -> Self {
        Self::with_phase(id.into(), tx, Phase::Replaying { pending: Vec::new() })
    }

    fn with_phase(id: String, tx: mpsc::Sender<Outbound>, phase: Phase) -> Self {
        Self {
            id,
            tx,
            phase: Mutex::new(phase),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        // Phase transitions never panic midway, so a poisoned lock is still consistent
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a live message to this client.
    ///
    /// Never blocks. Returns `false` when the message was not queued: the
    /// connection is closed, or its outbound or replay buffer is full
    /// (counted as a drop).
    pub fn deliver_live(&self, delivery: &Delivery) -> bool {
        let mut phase = self.phase();
        match &mut *phase {
            Phase::Replaying { pending } => {
                if pending.len() >= self.tx.max_capacity() {
                    self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                pending.push(delivery.clone());
                true
            }
            Phase::Live => self.try_send(Outbound::Deliver(delivery.clone())),
            Phase::Closed => false,
        }
    }

    /// Send a replayed message, waiting for buffer space.
    ///
    /// Returns `false` once the client has gone away.
    pub async fn deliver_replayed(&self, delivery: Delivery) -> bool {
        self.tx.send(Outbound::Deliver(delivery)).await.is_ok()
    }

    /// Switch to live delivery.
    ///
    /// Messages buffered during the replay are flushed in arrival order,
    /// skipping any the replay already covered (`sequence_id <= last_replayed`).
    /// Returns the number of buffered messages flushed.
    pub fn finish_replay(&self, last_replayed: SequenceId) -> usize {
        let mut phase = self.phase();
        let pending = match std::mem::replace(&mut *phase, Phase::Live) {
            Phase::Replaying { pending } => pending,
            Phase::Live => return 0,
            Phase::Closed => {
                *phase = Phase::Closed;
                return 0;
            }
        };

        // Flushed while holding the lock so a concurrent deliver_live cannot overtake
        let mut flushed = 0;
        for delivery in pending {
            if delivery.sequence_id > last_replayed && self.try_send(Outbound::Deliver(delivery)) {
                flushed += 1;
            }
        }
        flushed
    }

    /// Send an ack or notice, waiting for buffer space.
    ///
    /// Works in any phase but closed. Returns `false` once the client has
    /// gone away.
    pub async fn send(&self, event: Outbound) -> bool {
        !self.is_closed() && self.tx.send(event).await.is_ok()
    }

    fn try_send(&self, event: Outbound) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop all further deliveries
    pub fn close(&self) {
        *self.phase() = Phase::Closed;
    }

    /// Whether live messages go straight to the client
    pub fn is_live(&self) -> bool {
        matches!(*self.phase(), Phase::Live)
    }

    /// Whether the connection was closed
    pub fn is_closed(&self) -> bool {
        matches!(*self.phase(), Phase::Closed)
    }

    /// Total live messages dropped for this connection
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

// ============================================================================
// Connection Hub
// ============================================================================

/// Result of a local fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections that accepted (or buffered) the message
    pub delivered: usize,

    /// Connections whose outbound buffer was full
    pub dropped: usize,
}

/// Registry of every client attached to this instance
#[derive(Default)]
pub struct ConnectionHub {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl ConnectionHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one with the same id
    pub async fn add(&self, connection: Arc<ClientConnection>) -> usize {
        let mut connections = self.connections.write().await;
        connections.insert(connection.id.clone(), connection);
        connections.len()
    }

    /// Unregister a connection and stop deliveries to it
    pub async fn remove(&self, id: &str) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.write().await.remove(id);
        if let Some(connection) = &removed {
            connection.close();
        }
        removed
    }

    /// Look up a connection
    pub async fn get(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Offer a live message to every connection.
    ///
    /// A slow client only loses its own copy; it is never disconnected and
    /// never delays the others.
    pub async fn broadcast(&self, delivery: &Delivery) -> FanOut {
        let connections = self.connections.read().await;
        let mut result = FanOut::default();

        for connection in connections.values() {
            let before = connection.drop_count();
            if connection.deliver_live(delivery) {
                result.delivered += 1;
            } else if connection.drop_count() > before {
                result.dropped += 1;
                tracing::warn!(
                    connection_id = %connection.id,
                    sequence_id = delivery.sequence_id,
                    dropped_total = connection.drop_count(),
                    "Outbound buffer full, dropping live message"
                );
            }
        }

        result
    }

    /// Number of registered connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
