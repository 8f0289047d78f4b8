//! WebSocket wire protocol
//!
//! Every frame is a JSON object tagged by `type`.
//!
//! Client to server:
//!
//! ```json
//! {"type":"chat-message","content":"hi","clientOffset":"tok-1","ackId":7}
//! {"type":"hello","value":"world","ackId":8}
//! ```
//!
//! Server to client:
//!
//! ```json
//! {"type":"chat-message","content":"hi","serverOffset":1}
//! {"type":"ack","ackId":7,"serverOffset":1,"duplicate":false}
//! {"type":"error","message":"..."}
//! ```

use serde::{Deserialize, Serialize};

use crate::models::{Outbound, SequenceId};

/// Frame sent by a client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Submit a chat message
    ChatMessage {
        content: String,

        /// Dedup token; resend the same one when retrying
        #[serde(default)]
        client_offset: Option<String>,

        /// Echoed back in the ack; no ack is sent without it
        #[serde(default)]
        ack_id: Option<u64>,
    },

    /// Greeting, logged and acknowledged
    Hello {
        #[serde(default)]
        value: serde_json::Value,

        #[serde(default)]
        ack_id: Option<u64>,
    },
}

impl ClientFrame {
    /// Parse a text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Frame sent to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// A replayed or live message
    ChatMessage {
        content: String,
        server_offset: SequenceId,
    },

    /// Acknowledgment of a submission
    Ack {
        ack_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_offset: Option<SequenceId>,
        duplicate: bool,
    },

    /// Problem with the last frame
    Error { message: String },
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Outbound> for ServerFrame {
    fn from(event: Outbound) -> Self {
        match event {
            Outbound::Deliver(delivery) => Self::ChatMessage {
                content: delivery.content,
                server_offset: delivery.sequence_id,
            },
            Outbound::Ack { ack_id, receipt } => Self::Ack {
                ack_id,
                server_offset: receipt.sequence_id,
                duplicate: receipt.duplicate,
            },
            Outbound::Notice(message) => Self::Error { message },
        }
    }
}
