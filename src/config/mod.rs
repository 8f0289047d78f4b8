//! Configuration management for murmur instances
//!
//! This module handles loading and validating configuration from environment variables,
//! files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::{BusBackend, CoordinatorConfig};
use crate::storage::DEFAULT_REPLAY_BATCH_SIZE;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway configuration
    pub server: ServerConfig,

    /// Durable log configuration
    pub storage: StorageConfig,

    /// Cross-instance relay configuration
    pub coordinator: CoordinatorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Identifier on the bus (generated from the port when absent)
    pub instance_id: Option<String>,

    /// Per-connection outbound queue length
    pub outbound_buffer: usize,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 3000,
            instance_id: None,
            outbound_buffer: 1024,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl ServerConfig {
    /// Socket address built from `host` and `port`
    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Same settings on another port, without a fixed instance id
    pub fn for_port(&self, port: u16) -> Self {
        Self {
            port,
            instance_id: None,
            ..self.clone()
        }
    }
}

/// Durable log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,

    /// How long a writer waits on a locked database
    pub busy_timeout_ms: u64,

    /// Rows fetched per replay page
    pub replay_batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("chat.db"),
            busy_timeout_ms: 5_000,
            replay_batch_size: DEFAULT_REPLAY_BATCH_SIZE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let server = ServerConfig {
            host: std::env::var("MURMUR_HOST").unwrap_or(defaults.server.host),
            port: env_parse("MURMUR_PORT")
                .or_else(|| env_parse("PORT"))
                .unwrap_or(defaults.server.port),
            instance_id: std::env::var("MURMUR_INSTANCE_ID").ok(),
            outbound_buffer: env_parse("MURMUR_OUTBOUND_BUFFER")
                .unwrap_or(defaults.server.outbound_buffer),
            enable_cors: env_parse("MURMUR_ENABLE_CORS").unwrap_or(defaults.server.enable_cors),
            enable_request_logging: env_parse("MURMUR_REQUEST_LOGGING")
                .unwrap_or(defaults.server.enable_request_logging),
        };

        let storage = StorageConfig {
            sqlite_path: std::env::var("MURMUR_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.sqlite_path),
            busy_timeout_ms: env_parse("MURMUR_BUSY_TIMEOUT_MS")
                .unwrap_or(defaults.storage.busy_timeout_ms),
            replay_batch_size: env_parse("MURMUR_REPLAY_BATCH_SIZE")
                .unwrap_or(defaults.storage.replay_batch_size),
        };

        let redis_url = std::env::var("MURMUR_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .ok();

        let backend = match std::env::var("MURMUR_BUS") {
            Ok(value) => value
                .parse::<BusBackend>()
                .with_context(|| format!("Invalid MURMUR_BUS value: {value}"))?,
            // A Redis URL alone is enough to opt into the Redis bus
            Err(_) if redis_url.is_some() => BusBackend::Redis,
            Err(_) => defaults.coordinator.backend,
        };

        let coordinator = CoordinatorConfig {
            backend,
            redis_url: redis_url.unwrap_or(defaults.coordinator.redis_url),
            channel: std::env::var("MURMUR_CHANNEL").unwrap_or(defaults.coordinator.channel),
            pool_size: env_parse("MURMUR_REDIS_POOL_SIZE").unwrap_or(defaults.coordinator.pool_size),
            publish_timeout_ms: env_parse("MURMUR_PUBLISH_TIMEOUT_MS")
                .unwrap_or(defaults.coordinator.publish_timeout_ms),
            ..defaults.coordinator
        };

        let logging = LoggingConfig {
            level: std::env::var("MURMUR_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("MURMUR_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            server,
            storage,
            coordinator,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.outbound_buffer == 0 {
            anyhow::bail!("outbound_buffer must be greater than 0");
        }

        if self.storage.replay_batch_size == 0 {
            anyhow::bail!("replay_batch_size must be greater than 0");
        }

        if self.storage.sqlite_path.as_os_str().is_empty() {
            anyhow::bail!("sqlite_path must not be empty");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json', got '{}'", self.logging.format);
        }

        self.server.bind_address()?;
        self.coordinator
            .validate()
            .context("Invalid coordinator configuration")?;

        Ok(())
    }

    /// Get busy timeout as Duration
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }
}
