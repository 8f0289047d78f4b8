//! Broadcast coordination across instances
//!
//! Delivers every accepted message to every live connection, wherever the
//! connection is attached. Local connections are served first and directly;
//! other instances hear about the message through the bus.
//!
//! # Architecture
//!
//! ```text
//!        Instance A                               Instance B
//! ┌────────────────────────┐               ┌────────────────────────┐
//! │ publish(msg)           │               │                        │
//! │   ├─► ConnectionHub ──►│ clients A     │ ConnectionHub ──►      │ clients B
//! │   └─► BroadcastBus ────┼──► bus ──────►│ relay task ─┘          │
//! │                        │ (memory|redis)│ (skips own origin)     │
//! └────────────────────────┘               └────────────────────────┘
//! ```
//!
//! The bus is best-effort: if it cannot be reached, or does not answer within
//! the publish timeout, the publish still completes locally and the failure
//! is logged. Remote clients catch up through replay when they reconnect.
//!
//! Callers that append to the log and then publish hold [`BroadcastCoordinator::order_guard`]
//! across both steps, so local clients see this instance's messages in
//! ascending `sequence_id` order.
//!
//! # Usage
//!
//! ```ignore
//! use murmur::coordinator::{BroadcastCoordinator, LocalBus};
//!
//! let bus = Arc::new(LocalBus::default());
//! let coordinator = Arc::new(BroadcastCoordinator::new("node-a", bus));
//! let relay = coordinator.start_relay();
//! coordinator.publish(&Delivery::new("hi", 1)).await;
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod hub;
pub mod redis_bus;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::models::Delivery;

// Re-export main types
pub use bus::{BroadcastBus, Envelope, LocalBus};
pub use config::{BusBackend, CoordinatorConfig};
pub use error::{CoordinatorError, CoordinatorResult};
pub use hub::{ClientConnection, ConnectionHub, FanOut};
pub use redis_bus::RedisBus;

/// Build the bus selected by `config`
pub async fn connect_bus(config: &CoordinatorConfig) -> CoordinatorResult<Arc<dyn BroadcastBus>> {
    match config.backend {
        BusBackend::Memory => Ok(Arc::new(LocalBus::new(config.relay_capacity))),
        BusBackend::Redis => Ok(Arc::new(RedisBus::connect(config).await?)),
    }
}

/// Default upper bound on one bus publish
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// What happened to a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Local fan-out result
    pub local: FanOut,

    /// Whether the bus accepted the envelope
    pub relayed: bool,
}

/// Fan-out for one instance
pub struct BroadcastCoordinator {
    instance_id: String,
    hub: Arc<ConnectionHub>,
    bus: Arc<dyn BroadcastBus>,
    publish_timeout: Duration,
    order: Mutex<()>,
}

impl BroadcastCoordinator {
    /// Create a coordinator with an empty connection hub
    pub fn new(instance_id: impl Into<String>, bus: Arc<dyn BroadcastBus>) -> Self {
        Self::with_hub(instance_id, Arc::new(ConnectionHub::new()), bus)
    }

    /// Create a coordinator over an existing hub
    pub fn with_hub(
        instance_id: impl Into<String>,
        hub: Arc<ConnectionHub>,
        bus: Arc<dyn BroadcastBus>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            hub,
            bus,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            order: Mutex::new(()),
        }
    }

    /// Set how long a bus publish may take before it counts as failed
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Connections attached to this instance
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// Name of the bus backend
    pub fn bus_name(&self) -> &'static str {
        self.bus.name()
    }

    /// Take the per-instance ordering lock.
    ///
    /// Appends made while holding it, and the publishes of their results,
    /// happen one at a time, so ids leave this instance in ascending order.
    pub async fn order_guard(&self) -> MutexGuard<'_, ()> {
        self.order.lock().await
    }

    /// Deliver an accepted message to every live connection.
    ///
    /// Local delivery happens first and does not depend on the bus. The bus
    /// publish is bounded by the publish timeout.
    pub async fn publish(&self, delivery: &Delivery) -> PublishReport {
        let local = self.deliver_local(delivery).await;

        let envelope = Envelope::new(self.instance_id.as_str(), delivery);
        let relayed = match self.publish_to_bus(&envelope).await {
            Ok(()) => true,
            Err(e) => {
                metrics::record_bus_publish_failure(&self.instance_id);
                warn!(
                    instance = %self.instance_id,
                    sequence_id = delivery.sequence_id,
                    bus = self.bus.name(),
                    error = %e,
                    "Bus publish failed, message delivered locally only"
                );
                false
            }
        };

        PublishReport { local, relayed }
    }

    async fn publish_to_bus(&self, envelope: &Envelope) -> CoordinatorResult<()> {
        match tokio::time::timeout(self.publish_timeout, self.bus.publish(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::Unreachable(format!(
                "publish timed out after {}ms",
                self.publish_timeout.as_millis()
            ))),
        }
    }

    async fn deliver_local(&self, delivery: &Delivery) -> FanOut {
        let result = self.hub.broadcast(delivery).await;
        metrics::record_local_deliveries(&self.instance_id, result.delivered);
        for _ in 0..result.dropped {
            metrics::record_dropped_delivery(&self.instance_id);
        }
        result
    }

    /// Start relaying envelopes from other instances to local connections.
    ///
    /// The subscription is taken before this returns, so any envelope
    /// published afterwards is seen. The task ends when the bus closes.
    pub fn start_relay(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let coordinator = Arc::clone(self);

        info!(
            instance = %self.instance_id,
            bus = self.bus.name(),
            "Starting broadcast relay"
        );

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.origin == coordinator.instance_id {
                            continue;
                        }
                        debug!(
                            instance = %coordinator.instance_id,
                            origin = %envelope.origin,
                            sequence_id = envelope.sequence_id,
                            "Relaying remote message"
                        );
                        metrics::record_relayed(&coordinator.instance_id);
                        coordinator.deliver_local(&envelope.into_delivery()).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            instance = %coordinator.instance_id,
                            skipped,
                            "Relay fell behind, remote messages skipped"
                        );
                    }
                    Err(RecvError::Closed) => {
                        info!(instance = %coordinator.instance_id, "Bus closed, relay stopped");
                        break;
                    }
                }
            }
        })
    }
}
