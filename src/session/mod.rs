//! Per-connection session handling
//!
//! A session ties one client connection to the durable log and the
//! broadcast coordinator:
//!
//! ```text
//! Connecting ──(recovered)──────────────────────────► Live ──► Closed
//!     │                                                ▲
//!     └──(otherwise)──► ReplayPending ──(replay done)──┘
//! ```
//!
//! While a session is `ReplayPending` it receives every logged message after
//! the client's known offset, in order, and live messages are held back
//! until the replay finishes. Submissions append to the log first; only
//! accepted messages are published, and the submitter is acknowledged
//! unless the append failed. Append and publish run under the
//! coordinator's ordering guard, so every client on an instance sees that
//! instance's messages in ascending `sequence_id` order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::coordinator::{BroadcastCoordinator, ClientConnection};
use crate::metrics;
use crate::models::{AckReceipt, AppendOutcome, Delivery, Handshake, Outbound, SequenceId};
use crate::storage::{Replay, SharedMessageLog, StorageResult, DEFAULT_REPLAY_BATCH_SIZE};
use crate::utils::truncate_text;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    ReplayPending,
    Live,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::ReplayPending => "replay_pending",
            Self::Live => "live",
            Self::Closed => "closed",
        }
    }
}

/// Outcome of the replay performed on connect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Messages delivered by the replay
    pub delivered: usize,

    /// Highest sequence id the client is known to have after the replay
    pub last_sequence_id: SequenceId,

    /// Whether the replay stopped on a storage error
    pub failed: bool,
}

// ============================================================================
// Session Manager
// ============================================================================

/// Creates sessions for one instance
#[derive(Clone)]
pub struct SessionManager {
    log: SharedMessageLog,
    coordinator: Arc<BroadcastCoordinator>,
    replay_batch_size: usize,
}

impl SessionManager {
    pub fn new(log: SharedMessageLog, coordinator: Arc<BroadcastCoordinator>) -> Self {
        Self {
            log,
            coordinator,
            replay_batch_size: DEFAULT_REPLAY_BATCH_SIZE,
        }
    }

    /// Set the number of rows read per replay page
    pub fn with_replay_batch_size(mut self, batch_size: usize) -> Self {
        self.replay_batch_size = batch_size.max(1);
        self
    }

    pub fn log(&self) -> &SharedMessageLog {
        &self.log
    }

    pub fn coordinator(&self) -> &Arc<BroadcastCoordinator> {
        &self.coordinator
    }

    pub fn instance_id(&self) -> &str {
        self.coordinator.instance_id()
    }

    /// Attach a client.
    ///
    /// `outbound` must already be drained by the transport's writer; the
    /// replay waits for buffer space. Returns once the session is live.
    pub async fn connect(&self, handshake: Handshake, outbound: mpsc::Sender<Outbound>) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        let hub = self.coordinator.hub();

        let (connection, state) = if handshake.recovered {
            (Arc::new(ClientConnection::live(id.as_str(), outbound)), SessionState::Live)
        } else {
            (
                Arc::new(ClientConnection::replaying(id.as_str(), outbound)),
                SessionState::ReplayPending,
            )
        };

        // Registered before replay starts so no live message can fall between the two
        let connections = hub.add(Arc::clone(&connection)).await;
        metrics::set_connections(self.instance_id(), connections);

        let mut session = Session {
            id,
            manager: self.clone(),
            connection,
            state,
            replay: ReplaySummary::default(),
        };

        if state == SessionState::ReplayPending {
            session.replay = self.replay(&session.connection, handshake.known_offset).await;
            let flushed = session.connection.finish_replay(session.replay.last_sequence_id);
            session.state = SessionState::Live;

            debug!(
                session_id = %session.id,
                replayed = session.replay.delivered,
                flushed,
                "Replay finished, session live"
            );
        }

        info!(
            instance = %self.instance_id(),
            session_id = %session.id,
            known_offset = handshake.known_offset,
            recovered = handshake.recovered,
            replayed = session.replay.delivered,
            connections,
            "Client connected"
        );

        session
    }

    /// Deliver every logged message after `offset` to one connection
    async fn replay(&self, connection: &ClientConnection, offset: SequenceId) -> ReplaySummary {
        let mut summary = ReplaySummary {
            last_sequence_id: offset,
            ..Default::default()
        };

        if let Err(e) = self.drive_replay(connection, offset, &mut summary).await {
            summary.failed = true;
            metrics::record_replay_failure(self.instance_id());
            warn!(
                instance = %self.instance_id(),
                connection_id = %connection.id,
                offset,
                delivered = summary.delivered,
                error = %e,
                "Replay failed, continuing live with a possible gap"
            );
        }

        metrics::record_replayed(self.instance_id(), summary.delivered);
        summary
    }

    async fn drive_replay(
        &self,
        connection: &ClientConnection,
        offset: SequenceId,
        summary: &mut ReplaySummary,
    ) -> StorageResult<()> {
        let mut replay = Replay::open(self.log.as_ref(), offset, self.replay_batch_size).await?;

        while let Some(message) = replay.next().await? {
            let sequence_id = message.sequence_id;
            if !connection.deliver_replayed(message.into_delivery()).await {
                debug!(connection_id = %connection.id, "Client left during replay");
                break;
            }
            summary.delivered += 1;
            summary.last_sequence_id = sequence_id;
        }

        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

/// One connected client
pub struct Session {
    id: String,
    manager: SessionManager,
    connection: Arc<ClientConnection>,
    state: SessionState,
    replay: ReplaySummary,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// What the replay on connect delivered
    pub fn replay_summary(&self) -> ReplaySummary {
        self.replay
    }

    /// Submit a message from this client.
    ///
    /// `ack` runs exactly once when the message is durably stored, whether
    /// newly (`Accepted`, after fan-out) or previously (`Duplicate`, no
    /// fan-out). It never runs when the append fails; the error is returned
    /// so the caller can report it and the client can retry with the same
    /// token. `ack` runs after the ordering guard is released.
    pub async fn submit<F>(
        &self,
        content: &str,
        dedup_token: Option<&str>,
        ack: F,
    ) -> StorageResult<AppendOutcome>
    where
        F: FnOnce(AckReceipt),
    {
        let instance = self.manager.instance_id();
        let order = self.manager.coordinator.order_guard().await;

        let outcome = {
            let _timer = metrics::start_append_timer(instance);
            self.manager.log.append(content, dedup_token).await
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_append(instance, "error");
                warn!(
                    instance = %instance,
                    session_id = %self.id,
                    error = %e,
                    "Append failed, submission not acknowledged"
                );
                return Err(e);
            }
        };

        metrics::record_append(instance, outcome.as_str());

        match outcome {
            AppendOutcome::Accepted { sequence_id } => {
                debug!(
                    session_id = %self.id,
                    sequence_id,
                    content = %truncate_text(content, 64),
                    "Message accepted"
                );
                self.manager
                    .coordinator
                    .publish(&Delivery::new(content, sequence_id))
                    .await;
            }
            AppendOutcome::Duplicate { existing } => {
                debug!(
                    session_id = %self.id,
                    existing = ?existing,
                    "Duplicate submission, skipping fan-out"
                );
            }
        }
        drop(order);

        ack(AckReceipt::from(outcome));
        Ok(outcome)
    }

    /// Send an ack or notice to this client only, waiting for buffer space.
    ///
    /// Returns `false` if the client has gone away.
    pub async fn reply(&self, event: Outbound) -> bool {
        let sent = self.connection.send(event).await;
        if !sent {
            debug!(session_id = %self.id, "Reply not sent, client gone");
        }
        sent
    }

    /// Detach the client; nothing is delivered to it afterwards
    pub async fn disconnect(mut self) {
        let hub = self.manager.coordinator.hub();
        hub.remove(&self.id).await;
        self.state = SessionState::Closed;

        let remaining = hub.connection_count().await;
        metrics::set_connections(self.manager.instance_id(), remaining);

        info!(
            instance = %self.manager.instance_id(),
            session_id = %self.id,
            state = self.state.as_str(),
            dropped = self.connection.drop_count(),
            connected_secs = self.connection.age().as_secs(),
            remaining,
            "Client disconnected"
        );
    }
}
