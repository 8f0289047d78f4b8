//! Instance assembly and the in-process cluster launcher
//!
//! A [`Node`] is one complete instance: session manager, broadcast
//! coordinator with its relay task, and gateway server. A [`Cluster`] runs
//! several nodes in one process on consecutive ports; they share the durable
//! log and the bus, and are otherwise independent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{Config, ServerConfig};
use crate::coordinator::{connect_bus, BroadcastBus, BroadcastCoordinator, DEFAULT_PUBLISH_TIMEOUT};
use crate::gateway::{GatewayServer, ServerError};
use crate::session::SessionManager;
use crate::storage::{open_sqlite_log, SharedMessageLog, DEFAULT_REPLAY_BATCH_SIZE};
use crate::utils::generate_instance_id;

// ============================================================================
// Node
// ============================================================================

/// Per-instance tuning taken from the loaded config
#[derive(Debug, Clone, Copy)]
pub struct NodeOptions {
    /// Rows read per replay page
    pub replay_batch_size: usize,

    /// Upper bound on one bus publish
    pub publish_timeout: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            replay_batch_size: DEFAULT_REPLAY_BATCH_SIZE,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

impl NodeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            replay_batch_size: config.storage.replay_batch_size,
            publish_timeout: config.coordinator.publish_timeout(),
        }
    }
}

/// One running instance
pub struct Node {
    sessions: SessionManager,
    server: GatewayServer,
    relay: JoinHandle<()>,
}

impl Node {
    /// Assemble an instance and start its relay task
    pub fn start(
        server_config: ServerConfig,
        log: SharedMessageLog,
        bus: Arc<dyn BroadcastBus>,
        options: NodeOptions,
    ) -> Self {
        let instance_id = server_config
            .instance_id
            .clone()
            .unwrap_or_else(|| generate_instance_id(server_config.port));

        let coordinator = Arc::new(
            BroadcastCoordinator::new(instance_id, bus).with_publish_timeout(options.publish_timeout),
        );
        let relay = coordinator.start_relay();

        let sessions =
            SessionManager::new(log, coordinator).with_replay_batch_size(options.replay_batch_size);
        let server = GatewayServer::new(server_config, sessions.clone());

        Self {
            sessions,
            server,
            relay,
        }
    }

    pub fn instance_id(&self) -> &str {
        self.sessions.instance_id()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn server(&self) -> &GatewayServer {
        &self.server
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let result = self.server.serve(listener, shutdown).await;
        self.relay.abort();
        result
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<(), ServerError> {
        let listener = self.server.bind().await?;
        self.serve(listener, shutdown).await
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// Several instances in one process
pub struct Cluster {
    nodes: Vec<Node>,
}

impl Cluster {
    /// Build `workers` nodes on ports `base_port..base_port + workers`.
    ///
    /// All nodes share one SQLite log and one bus (in-process channel or
    /// Redis, per `config.coordinator.backend`).
    pub async fn build(config: &Config, workers: usize, base_port: u16) -> Result<Self> {
        if workers == 0 {
            anyhow::bail!("cluster needs at least one worker");
        }
        let last_port = usize::from(base_port) + workers - 1;
        if last_port > usize::from(u16::MAX) {
            anyhow::bail!("ports {base_port}..={last_port} exceed the valid range");
        }

        let log = open_sqlite_log(&config.storage.sqlite_path, config.storage.busy_timeout_ms)
            .with_context(|| {
                format!("Failed to open message log at {}", config.storage.sqlite_path.display())
            })?;

        let bus = connect_bus(&config.coordinator)
            .await
            .context("Failed to connect broadcast bus")?;

        let options = NodeOptions::from_config(config);
        let nodes = (0..workers)
            .map(|i| {
                let port = base_port + i as u16;
                Node::start(
                    config.server.for_port(port),
                    Arc::clone(&log),
                    Arc::clone(&bus),
                    options,
                )
            })
            .collect();

        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Run every node until `shutdown` resolves, then stop them all
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(self.nodes.len());

        for node in self.nodes {
            let mut stop = stop_rx.clone();
            let instance = node.instance_id().to_string();
            let wait = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };

            handles.push(tokio::spawn(async move {
                if let Err(e) = node.run(wait).await {
                    error!(instance = %instance, error = %e, "Instance stopped with error");
                    return Err(e);
                }
                Ok(())
            }));
        }

        info!(instances = handles.len(), "Cluster started");

        shutdown.await;
        info!("Shutting down cluster");
        let _ = stop_tx.send(true);

        let mut failures = 0;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => failures += 1,
                Err(e) => {
                    error!(error = %e, "Instance task panicked");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            anyhow::bail!("{failures} instance(s) failed");
        }
        Ok(())
    }
}
