//! Service wiring
//!
//! One supervised listener per active wallet of every configured network,
//! plus the delivery worker pool, all stopped by one cancellation token.

use crate::config::{Config, ConfigError, QueueBackend};
use crate::event::EventSource;
use crate::listener::ChainListener;
use crate::notify::NotificationSink;
use crate::reconciler::Reconciler;
use crate::supervisor::Supervisor;
use crate::tasks::{DeliveryHandler, TYPE_TRANSACTION_DELIVERY};
use delivery_queue::{Broker, Client, JetStreamBroker, MemoryBroker, ServeMux, Server};
use ledger_core::{LedgerStore, Storage, WalletStatus};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Inconsistent configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Ledger failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Queue failure
    #[error("Queue error: {0}")]
    Queue(#[from] delivery_queue::Error),
}

/// The assembled service
pub struct Paywall {
    config: Config,
    store: Arc<dyn LedgerStore>,
    broker: Arc<dyn Broker>,
    sources: HashMap<String, Arc<dyn EventSource>>,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Paywall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paywall")
            .field("service", &self.config.service_name)
            .field("networks", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Paywall {
    /// Assemble from explicit dependencies
    pub fn new(
        config: Config,
        store: Arc<dyn LedgerStore>,
        broker: Arc<dyn Broker>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            store,
            broker,
            sources: HashMap::new(),
            sink,
        }
    }

    /// Attach the event source for a network
    pub fn with_source(mut self, network: impl Into<String>, source: Arc<dyn EventSource>) -> Self {
        self.sources.insert(network.into(), source);
        self
    }

    /// Open the ledger configured in `config`
    pub fn open_store(config: &Config) -> Result<Arc<Storage>, RuntimeError> {
        Ok(Arc::new(Storage::open(&config.ledger)?))
    }

    /// Connect the broker configured in `config`
    pub async fn connect_broker(config: &Config) -> Result<Arc<dyn Broker>, RuntimeError> {
        Ok(match config.queue.backend {
            QueueBackend::Memory => Arc::new(MemoryBroker::with_queues(&config.dispatcher.weights())),
            QueueBackend::JetStream => Arc::new(
                JetStreamBroker::connect(&config.queue.jetstream(&config.dispatcher)).await?,
            ),
        })
    }

    /// Listeners for every active wallet on a network with a source
    pub fn listeners(&self) -> Result<Vec<ChainListener>, RuntimeError> {
        let client = Client::new(self.broker.clone());
        let mut listeners = Vec::new();

        for network in &self.config.networks {
            let Some(source) = self.sources.get(&network.name) else {
                warn!(network = %network.name, "No event source configured, skipping network");
                continue;
            };

            let wallets = self
                .store
                .wallets_by_status(&network.name, WalletStatus::Active)?;
            if wallets.is_empty() {
                warn!(network = %network.name, "No active wallet");
            }

            for wallet in wallets {
                listeners.push(ChainListener::new(
                    wallet,
                    network.clone(),
                    source.clone(),
                    self.store.clone(),
                    client.clone(),
                    self.config.delivery.clone(),
                    self.config.listener.clone(),
                ));
            }
        }

        Ok(listeners)
    }

    /// Run until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RuntimeError> {
        self.config.validate()?;
        let listeners = self.listeners()?;
        info!(
            service = %self.config.service_name,
            listeners = listeners.len(),
            "Starting"
        );

        let reconciler = Arc::new(Reconciler::new(self.store.clone(), self.sink.clone()));
        let mut mux = ServeMux::new();
        mux.handle(
            TYPE_TRANSACTION_DELIVERY,
            Arc::new(DeliveryHandler::new(reconciler)),
        );

        let mut tasks = JoinSet::new();

        let server = Server::new(self.broker.clone(), self.config.dispatcher.server());
        let server_cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = server.run(mux, server_cancel).await {
                error!("Delivery server failed: {}", e);
            }
        });

        for listener in listeners {
            let supervisor = Supervisor::new(self.config.supervisor.clone());
            let cancel = cancel.clone();
            tasks.spawn(async move {
                if let Err(e) = supervisor.supervise(&listener, cancel).await {
                    error!(wallet = %listener.wallet().address, "Listener gave up: {}", e);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Task terminated abnormally: {}", e);
            }
        }

        info!(service = %self.config.service_name, "Stopped");
        Ok(())
    }
}
