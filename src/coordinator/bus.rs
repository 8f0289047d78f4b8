//! Cross-instance relay transport
//!
//! Every instance publishes accepted messages to the bus and receives what
//! the other instances publish. Implementations differ only in reach: the
//! in-process [`LocalBus`] links instances sharing a process, the Redis bus
//! links instances anywhere.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::error::CoordinatorResult;
use crate::models::{Delivery, SequenceId};

/// A message as it travels between instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Instance that accepted the message
    pub origin: String,

    pub sequence_id: SequenceId,

    pub content: String,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, delivery: &Delivery) -> Self {
        Self {
            origin: origin.into(),
            sequence_id: delivery.sequence_id,
            content: delivery.content.clone(),
        }
    }

    /// Strip the routing header
    pub fn into_delivery(self) -> Delivery {
        Delivery {
            content: self.content,
            sequence_id: self.sequence_id,
        }
    }
}

/// Publish/subscribe transport shared by all instances
#[async_trait]
pub trait BroadcastBus: Send + Sync {
    /// Hand an envelope to every subscribed instance, including the publisher
    async fn publish(&self, envelope: &Envelope) -> CoordinatorResult<()>;

    /// Receive envelopes published after this call
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// In-process bus backed by a tokio broadcast channel.
///
/// Clones share the same channel; give each instance in a cluster a clone.
#[derive(Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Envelope>,
}

impl LocalBus {
    /// Create a bus holding up to `capacity` undelivered envelopes per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Number of subscribed instances
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[async_trait]
impl BroadcastBus for LocalBus {
    async fn publish(&self, envelope: &Envelope) -> CoordinatorResult<()> {
        // No subscribers is not a failure; there is simply nobody else
        let _ = self.sender.send(envelope.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
