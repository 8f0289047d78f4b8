//! Test fixtures for integration tests
//!
//! Builds instances over shared logs and buses, and gives receivers a
//! bounded wait so a missing delivery fails the test instead of hanging it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use murmur::coordinator::{
    BroadcastBus, BroadcastCoordinator, CoordinatorError, CoordinatorResult, Envelope, LocalBus,
};
use murmur::models::{Delivery, Handshake, Outbound, SequenceId};
use murmur::session::{Session, SessionManager};
use murmur::storage::SharedMessageLog;

/// How long a receiver waits for an expected event
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a receiver waits before concluding nothing is coming
pub const SILENCE_WINDOW: Duration = Duration::from_millis(150);

/// Build an instance over a shared log and bus and start its relay task
pub fn start_instance(
    instance_id: &str,
    log: &SharedMessageLog,
    bus: &Arc<dyn BroadcastBus>,
) -> SessionManager {
    let coordinator = Arc::new(BroadcastCoordinator::new(instance_id, Arc::clone(bus)));
    coordinator.start_relay();
    SessionManager::new(Arc::clone(log), coordinator).with_replay_batch_size(2)
}

/// An in-process bus shared by every instance of a test
pub fn shared_bus() -> Arc<dyn BroadcastBus> {
    Arc::new(LocalBus::new(1024))
}

/// Connected client: the session plus the receiving end of its outbound queue
pub struct TestClient {
    pub session: Session,
    pub rx: mpsc::Receiver<Outbound>,
}

impl TestClient {
    pub async fn connect(manager: &SessionManager, handshake: Handshake) -> Self {
        Self::connect_with_buffer(manager, handshake, 256).await
    }

    pub async fn connect_with_buffer(
        manager: &SessionManager,
        handshake: Handshake,
        buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let session = manager.connect(handshake, tx).await;
        Self { session, rx }
    }

    /// Next delivered message, skipping acks and notices
    pub async fn next_delivery(&mut self) -> Delivery {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.rx.recv()).await {
                Ok(Some(Outbound::Deliver(delivery))) => return delivery,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("outbound channel closed"),
                Err(_) => panic!("timed out waiting for a delivery"),
            }
        }
    }

    /// Collect `n` deliveries in arrival order
    pub async fn deliveries(&mut self, n: usize) -> Vec<Delivery> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.next_delivery().await);
        }
        out
    }

    /// Assert nothing at all arrives within the silence window
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(event)) = tokio::time::timeout(SILENCE_WINDOW, self.rx.recv()).await {
            panic!("expected no events, got {event:?}");
        }
    }

    /// Submit and return the ack receipt, if one was produced
    pub async fn send(&self, content: &str, token: Option<&str>) -> Option<murmur::models::AckReceipt> {
        let mut receipt = None;
        let _ = self
            .session
            .submit(content, token, |r| receipt = Some(r))
            .await;
        receipt
    }
}

/// Sequence ids of a batch of deliveries
pub fn sequence_ids(deliveries: &[Delivery]) -> Vec<SequenceId> {
    deliveries.iter().map(|d| d.sequence_id).collect()
}

/// Bus whose publishes always fail and which never delivers anything
pub struct DownBus {
    tx: broadcast::Sender<Envelope>,
}

impl DownBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }
}

#[async_trait]
impl BroadcastBus for DownBus {
    async fn publish(&self, _envelope: &Envelope) -> CoordinatorResult<()> {
        Err(CoordinatorError::Unreachable("bus is down".to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    fn name(&self) -> &'static str {
        "down"
    }
}

/// Bus whose publishes never complete
pub struct HangingBus {
    tx: broadcast::Sender<Envelope>,
}

impl HangingBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }
}

#[async_trait]
impl BroadcastBus for HangingBus {
    async fn publish(&self, _envelope: &Envelope) -> CoordinatorResult<()> {
        std::future::pending().await
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    fn name(&self) -> &'static str {
        "hanging"
    }
}
