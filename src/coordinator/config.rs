//! Broadcast coordinator configuration

use serde::{Deserialize, Serialize};

/// Transport used to relay messages between instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process channel; only instances in the same process see each other
    #[default]
    Memory,

    /// Redis pub/sub; instances in any process sharing the Redis server
    Redis,
}

impl BusBackend {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

impl std::str::FromStr for BusBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "local" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::InvalidValue {
                field: "backend".to_string(),
                reason: format!("Unknown bus backend: {other}"),
            }),
        }
    }
}

/// Configuration for the broadcast coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Relay transport
    pub backend: BusBackend,

    /// Redis URL (e.g., redis://localhost:6379)
    pub redis_url: String,

    /// Pub/sub channel name shared by all instances
    pub channel: String,

    /// Redis connection pool size (publishing side)
    pub pool_size: usize,

    /// Capacity of the in-process relay channel
    pub relay_capacity: usize,

    /// Initial delay before resubscribing after the bus drops
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for the resubscribe delay
    pub reconnect_max_delay_ms: u64,

    /// Longest a single bus publish may take before it counts as failed
    pub publish_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            channel: "murmur:broadcast".to_string(),
            pool_size: 4,
            relay_capacity: 4096,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            publish_timeout_ms: 2_000,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Publish timeout as a duration
    pub fn publish_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.publish_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "channel".to_string(),
            });
        }

        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_size".to_string(),
                reason: "Must allow at least 1 connection".to_string(),
            });
        }

        if self.relay_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "relay_capacity".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.publish_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "publish_timeout_ms".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect_max_delay_ms".to_string(),
                reason: "Max delay must not be below base delay".to_string(),
            });
        }

        if self.backend == BusBackend::Redis && self.redis_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "redis_url".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    backend: Option<BusBackend>,
    redis_url: Option<String>,
    channel: Option<String>,
    pool_size: Option<usize>,
    relay_capacity: Option<usize>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    publish_timeout_ms: Option<u64>,
}

impl CoordinatorConfigBuilder {
    /// Set relay backend
    pub fn backend(mut self, backend: BusBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set relay backend from string
    pub fn backend_str(mut self, backend: &str) -> Result<Self, ConfigError> {
        self.backend = Some(backend.parse()?);
        Ok(self)
    }

    /// Set Redis URL
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Set channel name
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set pool size
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Set relay channel capacity
    pub fn relay_capacity(mut self, capacity: usize) -> Self {
        self.relay_capacity = Some(capacity);
        self
    }

    /// Set reconnect delays
    pub fn reconnect_delays(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.reconnect_base_delay_ms = Some(base_ms);
        self.reconnect_max_delay_ms = Some(max_ms);
        self
    }

    /// Set bus publish timeout
    pub fn publish_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.publish_timeout_ms = Some(timeout_ms);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            backend: self.backend.unwrap_or(defaults.backend),
            redis_url: self.redis_url.unwrap_or(defaults.redis_url),
            channel: self.channel.unwrap_or(defaults.channel),
            pool_size: self.pool_size.unwrap_or(defaults.pool_size),
            relay_capacity: self.relay_capacity.unwrap_or(defaults.relay_capacity),
            reconnect_base_delay_ms: self
                .reconnect_base_delay_ms
                .unwrap_or(defaults.reconnect_base_delay_ms),
            reconnect_max_delay_ms: self
                .reconnect_max_delay_ms
                .unwrap_or(defaults.reconnect_max_delay_ms),
            publish_timeout_ms: self
                .publish_timeout_ms
                .unwrap_or(defaults.publish_timeout_ms),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
