use anyhow::{Context, Result};
use std::sync::Arc;

use murmur::cluster::{Cluster, Node, NodeOptions};
use murmur::config::Config;
use murmur::coordinator::connect_bus;
use murmur::storage::open_sqlite_log;

// ============================================================================
// Single Instance
// ============================================================================

/// Run one instance until Ctrl+C
pub async fn serve(config: Config) -> Result<()> {
    murmur::metrics::init_metrics();

    println!("Starting murmur instance");
    println!("========================");
    println!("  Database: {}", config.storage.sqlite_path.display());
    println!("  Bus: {}", config.coordinator.backend.as_str());
    println!();

    let log = open_sqlite_log(&config.storage.sqlite_path, config.storage.busy_timeout_ms)
        .with_context(|| {
            format!("Failed to open message log at {}", config.storage.sqlite_path.display())
        })?;

    let bus = connect_bus(&config.coordinator)
        .await
        .context("Failed to connect broadcast bus")?;

    let node = Node::start(
        config.server.clone(),
        log,
        Arc::clone(&bus),
        NodeOptions::from_config(&config),
    );

    println!("{}", node.server().info().display());
    println!();
    println!("Press Ctrl+C to stop");

    node.run(shutdown_signal())
        .await
        .context("Gateway server failed")?;

    println!("murmur instance stopped.");
    Ok(())
}

// ============================================================================
// Cluster
// ============================================================================

/// Parameters for the cluster command
pub struct ClusterParams {
    pub workers: Option<usize>,
    pub base_port: u16,
}

/// Run several instances in this process until Ctrl+C
pub async fn cluster(config: Config, params: ClusterParams) -> Result<()> {
    murmur::metrics::init_metrics();

    let workers = match params.workers {
        Some(n) => n,
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    };

    println!("Starting murmur cluster");
    println!("=======================");
    println!("  Instances: {workers}");
    println!(
        "  Ports: {}..={}",
        params.base_port,
        usize::from(params.base_port) + workers.saturating_sub(1)
    );
    println!("  Database: {}", config.storage.sqlite_path.display());
    println!("  Bus: {}", config.coordinator.backend.as_str());
    println!();

    let cluster = Cluster::build(&config, workers, params.base_port).await?;

    for node in cluster.nodes() {
        println!(
            "  {} -> {}",
            node.instance_id(),
            node.server().info().bind_address
        );
    }
    println!();
    println!("Press Ctrl+C to stop");

    cluster.run(shutdown_signal()).await?;

    println!("murmur cluster stopped.");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }
}
