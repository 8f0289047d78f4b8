use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use murmur::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "murmur",
    version,
    about = "Durable chat broadcast with gap recovery and cross-instance fan-out",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file; environment variables are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path; overrides the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single instance
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Instance identifier used on the broadcast bus
        #[arg(long)]
        instance_id: Option<String>,
    },

    /// Run several instances in one process on consecutive ports
    Cluster {
        /// Number of instances (defaults to available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Port of the first instance
        #[arg(long, default_value = "3000")]
        base_port: u16,
    },

    /// Print logged messages after an offset
    History {
        /// Last sequence id already seen
        #[arg(short, long, default_value = "0")]
        offset: i64,

        /// Maximum number of messages to print
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show message log statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.sqlite_path = db;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    tracing::info!("murmur starting");

    match cli.command {
        Commands::Serve {
            host,
            port,
            instance_id,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if instance_id.is_some() {
                config.server.instance_id = instance_id;
            }
            config.validate()?;

            tracing::info!(
                bind = %config.server.host,
                port = config.server.port,
                bus = config.coordinator.backend.as_str(),
                "Starting serve command"
            );
            commands::serve(config).await?;
        }
        Commands::Cluster { workers, base_port } => {
            tracing::info!(
                workers = ?workers,
                base_port = base_port,
                "Starting cluster command"
            );
            commands::cluster(config, commands::ClusterParams { workers, base_port }).await?;
        }
        Commands::History { offset, limit } => {
            commands::history(config, offset, limit).await?;
        }
        Commands::Stats => {
            commands::stats(config).await?;
        }
    }

    tracing::info!("murmur completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("murmur=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("murmur={level},warn"))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("murmur=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
