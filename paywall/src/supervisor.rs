//! Listener restart policy
//!
//! Restarts a failed listener with exponential backoff. Each restart resumes
//! from the last recorded transaction. Fatal errors and an exhausted restart
//! budget stop the wallet's listener; a run that stayed healthy long enough
//! resets the budget.

use crate::error::Result;
use crate::listener::ChainListener;
use crate::metrics::LISTENER_RESTARTS_TOTAL;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// First restart delay (milliseconds)
    pub initial_backoff_ms: u64,

    /// Restart delay cap (milliseconds)
    pub max_backoff_ms: u64,

    /// Consecutive restarts before giving up
    pub max_restarts: u32,

    /// A run longer than this resets the restart budget (milliseconds)
    pub healthy_after_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            max_restarts: 10,
            healthy_after_ms: 300_000,
        }
    }
}

impl SupervisorConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Keeps one listener running
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    config: SupervisorConfig,
}

impl Supervisor {
    /// Create a supervisor
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    /// Run `listener` until cancelled, restarting it on recoverable failures
    pub async fn supervise(&self, listener: &ChainListener, cancel: CancellationToken) -> Result<()> {
        let address = listener.wallet().address.clone();
        let network = listener.wallet().network.clone();
        let mut backoff = self.config.backoff();
        let mut restarts = 0u32;

        loop {
            let started = Instant::now();
            let err = match listener.run(cancel.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if cancel.is_cancelled() => {
                    info!(wallet = %address, "Listener exited during shutdown: {}", e);
                    return Ok(());
                }
                Err(e) => e,
            };

            if err.is_fatal() {
                error!(wallet = %address, %network, "Listener stopped permanently: {}", err);
                return Err(err);
            }

            if started.elapsed() >= Duration::from_millis(self.config.healthy_after_ms) {
                backoff.reset();
                restarts = 0;
            }

            restarts += 1;
            if restarts > self.config.max_restarts {
                error!(
                    wallet = %address,
                    %network,
                    restarts = restarts - 1,
                    "Restart budget exhausted: {}",
                    err
                );
                return Err(err);
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(Duration::from_millis(self.config.max_backoff_ms));
            LISTENER_RESTARTS_TOTAL
                .with_label_values(&[network.as_str()])
                .inc();
            warn!(
                wallet = %address,
                %network,
                restart = restarts,
                ?delay,
                "Restarting listener after error: {}",
                err
            );

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
