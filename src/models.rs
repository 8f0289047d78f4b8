//! Core data structures shared by the log, the coordinator and the sessions.

use serde::{Deserialize, Serialize};

/// Position of a message in the durable log.
///
/// Assigned by the log at accept time; `0` means "nothing seen yet".
pub type SequenceId = i64;

/// Offset used when a client supplies no prior knowledge.
pub const NO_OFFSET: SequenceId = 0;

// ============================================================================
// Message
// ============================================================================

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Log-assigned sequence number
    pub sequence_id: SequenceId,

    /// Client-supplied idempotency key (`None` when absent or empty)
    pub dedup_token: Option<String>,

    /// Payload, stored verbatim
    pub content: String,
}

impl Message {
    /// Convert into the form delivered to clients
    pub fn into_delivery(self) -> Delivery {
        Delivery {
            content: self.content,
            sequence_id: self.sequence_id,
        }
    }
}

/// Normalize a client token: empty strings count as absent.
pub fn normalize_token(token: Option<&str>) -> Option<&str> {
    token.filter(|t| !t.is_empty())
}

// ============================================================================
// Append Outcome
// ============================================================================

/// Result of a successful call to `MessageLog::append`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new row was written
    Accepted { sequence_id: SequenceId },

    /// A row with the same token already existed; nothing was written.
    ///
    /// `existing` is the original row's sequence id when it could be read back.
    Duplicate { existing: Option<SequenceId> },
}

impl AppendOutcome {
    /// Whether a new row was written
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Sequence id associated with this outcome, if known
    pub fn sequence_id(&self) -> Option<SequenceId> {
        match self {
            Self::Accepted { sequence_id } => Some(*sequence_id),
            Self::Duplicate { existing } => *existing,
        }
    }

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Duplicate { .. } => "duplicate",
        }
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// A message as delivered to a client, either by replay or live fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub content: String,
    pub sequence_id: SequenceId,
}

impl Delivery {
    pub fn new(content: impl Into<String>, sequence_id: SequenceId) -> Self {
        Self {
            content: content.into(),
            sequence_id,
        }
    }
}

// ============================================================================
// Handshake / Ack
// ============================================================================

/// What the transport tells us about a connecting client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Handshake {
    /// Highest sequence id the client claims to have seen
    pub known_offset: SequenceId,

    /// The transport already restored the client's session
    pub recovered: bool,
}

impl Handshake {
    /// Fresh client with no history
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Client resuming from a known offset without transport recovery
    pub fn resume_from(known_offset: SequenceId) -> Self {
        Self {
            known_offset: known_offset.max(NO_OFFSET),
            recovered: false,
        }
    }

    /// Client whose session the transport restored
    pub fn recovered(known_offset: SequenceId) -> Self {
        Self {
            known_offset: known_offset.max(NO_OFFSET),
            recovered: true,
        }
    }
}

/// Payload handed to a submitter's acknowledgment callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckReceipt {
    /// Sequence id of the stored message, if known
    pub sequence_id: Option<SequenceId>,

    /// True when the submission was a retransmission
    pub duplicate: bool,
}

impl From<AppendOutcome> for AckReceipt {
    fn from(outcome: AppendOutcome) -> Self {
        Self {
            sequence_id: outcome.sequence_id(),
            duplicate: !outcome.is_accepted(),
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Event queued for a single client connection.
///
/// The transport decides how each variant is framed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A chat message (replayed or live)
    Deliver(Delivery),

    /// Acknowledgment of a submission carrying the client's ack id
    Ack { ack_id: u64, receipt: AckReceipt },

    /// A protocol-level problem reported back to the client
    Notice(String),
}
