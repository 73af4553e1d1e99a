//! Per-wallet chain listener
//!
//! Startup resolves the wallet's account, its token wallets and the coin rows
//! of every accepted asset, then subscribes after the highest sequence already
//! recorded for the wallet. A producer task forwards events into a bounded
//! channel; the listener consumes them one at a time, in order:
//! classify, record, enqueue a delivery task, advance the cursor.
//!
//! The cursor advances on every event, including ignored ones. A stream that
//! ends without cancellation is reported as [`ListenerError::StreamEnded`].

use crate::classifier::Classifier;
use crate::config::{DeliveryConfig, NetworkConfig};
use crate::error::{ListenerError, Result};
use crate::event::{ChainEvent, EventSource, EventStream};
use crate::metrics::EVENTS_TOTAL;
use crate::recorder::Recorder;
use crate::tasks::new_delivery_task;
use backoff::ExponentialBackoffBuilder;
use delivery_queue::Client;
use futures::StreamExt;
use ledger_core::{Coin, LedgerStore, NewTransaction, Transaction, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Listener tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bound on account resolution and subscription (milliseconds)
    pub startup_timeout_ms: u64,

    /// Events buffered between the subscription and the consumer
    pub event_buffer: usize,

    /// First delay when recording or enqueueing fails (milliseconds)
    pub persist_initial_backoff_ms: u64,

    /// Delay cap when recording or enqueueing fails (milliseconds)
    pub persist_max_backoff_ms: u64,

    /// Give up on one transfer after this long (milliseconds)
    pub persist_max_elapsed_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 30_000,
            event_buffer: 64,
            persist_initial_backoff_ms: 100,
            persist_max_backoff_ms: 5_000,
            persist_max_elapsed_ms: 60_000,
        }
    }
}

impl ListenerConfig {
    /// Startup bound
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Listener for one receiving wallet
pub struct ChainListener {
    wallet: Wallet,
    network: NetworkConfig,
    source: Arc<dyn EventSource>,
    store: Arc<dyn LedgerStore>,
    recorder: Recorder,
    client: Client,
    delivery: DeliveryConfig,
    config: ListenerConfig,
}

impl std::fmt::Debug for ChainListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainListener")
            .field("wallet", &self.wallet.address)
            .field("network", &self.network.name)
            .finish()
    }
}

struct Subscription {
    classifier: Classifier,
    cursor: u64,
    stream: EventStream,
}

impl ChainListener {
    /// Create a listener
    pub fn new(
        wallet: Wallet,
        network: NetworkConfig,
        source: Arc<dyn EventSource>,
        store: Arc<dyn LedgerStore>,
        client: Client,
        delivery: DeliveryConfig,
        config: ListenerConfig,
    ) -> Self {
        let recorder = Recorder::new(store.clone(), network.name.clone());
        Self {
            wallet,
            network,
            source,
            store,
            recorder,
            client,
            delivery,
            config,
        }
    }

    /// Monitored wallet
    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Run until cancelled or failed
    ///
    /// Returns `Ok(())` only after cancellation.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let timeout = self.config.startup_timeout();
        let started = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            started = tokio::time::timeout(timeout, self.start()) => started,
        };
        let Subscription {
            classifier,
            mut cursor,
            mut stream,
        } = started.map_err(|_| ListenerError::StartupTimeout(timeout))??;

        info!(
            wallet = %self.wallet.address,
            network = %self.network.name,
            cursor,
            "Waiting for transfers"
        );

        let (tx, mut rx) = mpsc::channel(self.config.event_buffer.max(1));
        let producer_cancel = cancel.child_token();
        let producer = {
            let cancel = producer_cancel.clone();
            tokio::spawn(async move {
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => break,
                        item = stream.next() => item,
                    };
                    let Some(item) = item else { break };
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
            })
        };

        let result = loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                item = rx.recv() => item,
            };

            match item {
                Some(Ok(event)) => {
                    if let Err(e) = self.handle_event(&classifier, &mut cursor, event).await {
                        break Err(e);
                    }
                }
                Some(Err(e)) => break Err(ListenerError::Source(e)),
                None if cancel.is_cancelled() => break Ok(()),
                None => break Err(ListenerError::StreamEnded),
            }
        };

        producer_cancel.cancel();
        producer.abort();

        match &result {
            Ok(()) => info!(wallet = %self.wallet.address, cursor, "Listener stopped"),
            Err(e) => warn!(wallet = %self.wallet.address, cursor, "Listener failed: {}", e),
        }
        result
    }

    async fn start(&self) -> Result<Subscription> {
        let network = &self.network.name;
        let native = self.coin(&self.network.native_unit)?;
        let token_coins = self
            .network
            .tokens
            .iter()
            .map(|token| -> Result<_> { Ok((token, self.coin(&token.unit)?)) })
            .collect::<Result<Vec<_>>>()?;

        let account = self.source.resolve_account(&self.wallet.address).await?;

        let mut tokens = HashMap::new();
        for (token, coin) in token_coins {
            let token_wallet = self
                .source
                .resolve_token_wallet(&account, &token.master_address)
                .await?;
            debug!(%network, unit = %token.unit, %token_wallet, "Resolved token wallet");
            tokens.insert(token_wallet, coin);
        }
        let classifier = Classifier::new(self.wallet.address.clone(), native, tokens);

        let latest = self.store.latest_transaction(&self.wallet.address)?;
        let cursor = latest.as_ref().map_or(0, |tx| tx.sequence);

        // Its delivery task may have been lost between record and enqueue
        if let Some(tx) = &latest {
            self.enqueue(tx).await?;
        }

        let stream = self.source.subscribe(&account, cursor).await?;
        Ok(Subscription {
            classifier,
            cursor,
            stream,
        })
    }

    fn coin(&self, unit: &str) -> Result<Coin> {
        self.store
            .coin_by_unit(&self.network.name, unit)?
            .ok_or_else(|| ListenerError::MissingCoin {
                network: self.network.name.clone(),
                unit: unit.to_string(),
            })
    }

    async fn handle_event(
        &self,
        classifier: &Classifier,
        cursor: &mut u64,
        event: ChainEvent,
    ) -> Result<()> {
        if event.sequence <= *cursor {
            debug!(sequence = event.sequence, cursor = *cursor, "Skipping already processed event");
            EVENTS_TOTAL
                .with_label_values(&[self.network.name.as_str(), "stale"])
                .inc();
            return Ok(());
        }

        let classification = classifier.classify(&event);
        EVENTS_TOTAL
            .with_label_values(&[self.network.name.as_str(), classification.label()])
            .inc();

        match classification.into_transfer() {
            Some(transfer) => self.persist(transfer).await?,
            None => debug!(sequence = event.sequence, hash = %event.hash, "Ignored event"),
        }

        *cursor = event.sequence;
        Ok(())
    }

    /// Record and enqueue with retry; escalates once the budget is spent
    async fn persist(&self, transfer: NewTransaction) -> Result<()> {
        let sequence = transfer.sequence;
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.persist_initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.config.persist_max_backoff_ms))
            .with_max_elapsed_time(Some(Duration::from_millis(self.config.persist_max_elapsed_ms)))
            .build();

        let transfer = &transfer;
        backoff::future::retry(policy, || async move {
            let outcome = self.recorder.record(transfer.clone()).map_err(|e| {
                warn!(sequence, "Recording transfer failed: {}", e);
                backoff::Error::transient(ListenerError::from(e))
            })?;
            self.enqueue(outcome.transaction()).await.map_err(|e| {
                warn!(sequence, "Enqueueing delivery failed: {}", e);
                backoff::Error::transient(e)
            })
        })
        .await
        .map_err(|e| ListenerError::PersistFailed {
            sequence,
            reason: e.to_string(),
        })
    }

    async fn enqueue(&self, tx: &Transaction) -> Result<()> {
        let task = new_delivery_task(tx, &self.wallet, &self.delivery)?;
        let info = self.client.enqueue(task).await?;
        debug!(tx = tx.id, task = %info.id, queue = %info.queue, "Delivery enqueued");
        Ok(())
    }
}
