//! Producer-side client with enqueue retry

use crate::{broker::Broker, task::Task, Error, Result, TaskInfo};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Max enqueue attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Enqueues tasks onto a broker
#[derive(Clone)]
pub struct Client {
    broker: Arc<dyn Broker>,
    config: ClientConfig,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("config", &self.config).finish()
    }
}

impl Client {
    /// Create a client with default retry settings
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_config(broker, ClientConfig::default())
    }

    /// Create a client with explicit retry settings
    pub fn with_config(broker: Arc<dyn Broker>, config: ClientConfig) -> Self {
        Self { broker, config }
    }

    /// Enqueue with exponential backoff retry
    pub async fn enqueue(&self, task: Task) -> Result<TaskInfo> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.broker.enqueue(task.clone()).await {
                Ok(info) => {
                    if attempts > 1 {
                        info!("Task {} enqueued after {} attempts", info.id, attempts);
                    }
                    return Ok(info);
                }
                // Configuration problem, not transient
                Err(e @ Error::UnknownQueue(_)) => return Err(e),
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!("Failed to enqueue task {} after {} attempts: {}", task.id, attempts, e);
                        return Err(e);
                    }

                    warn!(
                        "Enqueue failed (attempt {}), retrying in {:?}: {}",
                        attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }
}
