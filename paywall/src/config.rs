//! Configuration for the payment pipeline

use crate::listener::ListenerConfig;
use crate::supervisor::SupervisorConfig;
use delivery_queue::{JetStreamConfig, QueueWeights, ServerConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mainnet USDT master contract
pub const USDT_MASTER_MAINNET: &str = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";

/// Testnet USDT master contract
pub const USDT_MASTER_TESTNET: &str = "kQD0GKBM8ZbryVk2aESmzfU6b9b_8era_IkvBSELujFZPsyy";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// File could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment variable has an invalid value
    #[error("Invalid value for {name}: {reason}")]
    Env {
        /// Variable name
        name: String,
        /// Parse failure
        reason: String,
    },

    /// Settings contradict each other
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Ledger storage
    pub ledger: ledger_core::Config,

    /// Task transport
    pub queue: QueueConfig,

    /// Delivery worker pool
    pub dispatcher: DispatcherConfig,

    /// Delivery task options
    pub delivery: DeliveryConfig,

    /// Chain listener tuning
    pub listener: ListenerConfig,

    /// Listener restart policy
    pub supervisor: SupervisorConfig,

    /// Log output
    pub telemetry: TelemetryConfig,

    /// Monitored networks
    pub networks: Vec<NetworkConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "paywall".to_string(),
            ledger: ledger_core::Config::default(),
            queue: QueueConfig::default(),
            dispatcher: DispatcherConfig::default(),
            delivery: DeliveryConfig::default(),
            listener: ListenerConfig::default(),
            supervisor: SupervisorConfig::default(),
            telemetry: TelemetryConfig::default(),
            networks: vec![NetworkConfig::ton(false)],
        }
    }
}

/// Task transport backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process queue; tasks are lost on restart
    Memory,
    /// NATS JetStream
    JetStream,
}

/// Task transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Backend
    pub backend: QueueBackend,

    /// NATS server URL
    pub nats_url: String,

    /// Stream and subject prefix
    pub stream_prefix: String,

    /// Redelivery timeout for unacknowledged tasks (seconds)
    pub ack_wait_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::JetStream,
            nats_url: "nats://localhost:4222".to_string(),
            stream_prefix: "paywall".to_string(),
            ack_wait_secs: 25 * 60,
        }
    }
}

impl QueueConfig {
    /// JetStream broker settings for the dispatcher's queues
    pub fn jetstream(&self, dispatcher: &DispatcherConfig) -> JetStreamConfig {
        JetStreamConfig {
            url: self.nats_url.clone(),
            stream_prefix: self.stream_prefix.clone(),
            queues: dispatcher.weights().names(),
            ack_wait: Duration::from_secs(self.ack_wait_secs),
            ..Default::default()
        }
    }
}

/// Named queue weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueWeight {
    /// Queue name
    pub name: String,
    /// Relative weight
    pub weight: u32,
}

/// Delivery worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Concurrent workers
    pub concurrency: usize,

    /// Queues in priority order with relative weights
    pub queues: Vec<QueueWeight>,

    /// Dequeue wait (milliseconds)
    pub dequeue_wait_ms: u64,

    /// First retry delay (milliseconds)
    pub retry_base_delay_ms: u64,

    /// Retry delay cap (milliseconds)
    pub retry_max_delay_ms: u64,

    /// Drain period on shutdown (milliseconds)
    pub shutdown_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let weight = |name: &str, weight| QueueWeight {
            name: name.to_string(),
            weight,
        };
        Self {
            concurrency: 10,
            queues: vec![weight("critical", 6), weight("default", 3), weight("low", 1)],
            dequeue_wait_ms: 1_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 600_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl DispatcherConfig {
    /// Queue weights
    pub fn weights(&self) -> QueueWeights {
        QueueWeights::new(self.queues.iter().map(|q| (q.name.clone(), q.weight)))
    }

    /// Worker server settings
    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            concurrency: self.concurrency,
            queues: self.weights(),
            dequeue_wait: Duration::from_millis(self.dequeue_wait_ms),
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }
}

/// Delivery task options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Queue for delivery tasks
    pub queue: String,

    /// Retry budget
    pub max_retry: u32,

    /// Execution timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue: "default".to_string(),
            max_retry: 5,
            timeout_secs: 20 * 60,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub filter: String,

    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Token accepted on a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Unit symbol of the coin row
    pub unit: String,

    /// Token master contract address
    pub master_address: String,
}

/// Monitored network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name, as stored on coin and wallet rows
    pub name: String,

    /// Unit symbol of the native coin
    pub native_unit: String,

    /// Accepted tokens
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

impl NetworkConfig {
    /// TON with native TON and USDT
    pub fn ton(mainnet: bool) -> Self {
        let master = if mainnet {
            USDT_MASTER_MAINNET
        } else {
            USDT_MASTER_TESTNET
        };
        Self {
            name: "TON".to_string(),
            native_unit: "TON".to_string(),
            tokens: vec![TokenConfig {
                unit: "USDT".to_string(),
                master_address: master.to_string(),
            }],
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that delivery tasks land on a queue the dispatcher polls
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = self.dispatcher.weights();
        if weights.is_empty() {
            return Err(ConfigError::Invalid(
                "dispatcher has no queue with a non-zero weight".to_string(),
            ));
        }
        if !weights.contains(&self.delivery.queue) {
            return Err(ConfigError::Invalid(format!(
                "delivery queue {} is not polled by the dispatcher (queues: {})",
                self.delivery.queue,
                weights.names().join(", ")
            )));
        }
        Ok(())
    }

    /// Load from environment variables, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let mainnet = var("PAYWALL_ENV").as_deref() == Some("prod");
        config.networks = vec![NetworkConfig::ton(mainnet)];

        if let Some(name) = var("PAYWALL_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Some(dir) = var("PAYWALL_DATA_DIR") {
            config.ledger.data_dir = dir.into();
        }
        if let Some(url) = var("NATS_URL") {
            config.queue.nats_url = url;
        }
        if let Some(backend) = var("PAYWALL_QUEUE_BACKEND") {
            config.queue.backend = match backend.as_str() {
                "memory" => QueueBackend::Memory,
                "jetstream" => QueueBackend::JetStream,
                other => {
                    return Err(ConfigError::Env {
                        name: "PAYWALL_QUEUE_BACKEND".to_string(),
                        reason: format!("unknown backend {}", other),
                    })
                }
            };
        }
        if let Some(concurrency) = var("PAYWALL_CONCURRENCY") {
            config.dispatcher.concurrency =
                concurrency.parse().map_err(|e: std::num::ParseIntError| ConfigError::Env {
                    name: "PAYWALL_CONCURRENCY".to_string(),
                    reason: e.to_string(),
                })?;
        }
        if let Some(json) = var("PAYWALL_LOG_JSON") {
            config.telemetry.json = matches!(json.as_str(), "1" | "true");
        }

        config.validate()?;
        Ok(config)
    }
}
