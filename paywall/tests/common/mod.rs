//! Shared fixtures: a scripted event source, a recording sink and a seeded ledger

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ledger_core::{
    Coin, Config as LedgerConfig, Invoice, LedgerStore, NewCoin, NewWallet, Storage, Transaction,
    Wallet, WalletStatus,
};
use paywall::config::{DeliveryConfig, NetworkConfig, TokenConfig};
use paywall::{
    AccountHandle, ChainEvent, ChainListener, Direction, EventSource, EventStream, ListenerConfig,
    MessageBody, MessageKind, NotificationSink, SourceError, TransferNotification,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NETWORK: &str = "TON";
pub const WALLET: &str = "EQwallet";
pub const USDT_MASTER: &str = "EQusdt-master";
pub const USDT_WALLET: &str = "EQusdt-wallet-of-EQwallet";

/// Event source replaying a fixed script
pub struct ScriptedSource {
    events: Mutex<Vec<ChainEvent>>,
    /// Cursor passed to every subscribe call
    pub subscriptions: Mutex<Vec<u64>>,
    /// Ignore the cursor and replay everything
    pub replay_all: bool,
    /// End the stream after the script instead of waiting forever
    pub end_stream: bool,
    /// Never answer account resolution
    pub hang_on_resolve: bool,
}

impl ScriptedSource {
    pub fn new(events: Vec<ChainEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            subscriptions: Mutex::new(Vec::new()),
            replay_all: false,
            end_stream: true,
            hang_on_resolve: false,
        }
    }

    pub fn open_ended(mut self) -> Self {
        self.end_stream = false;
        self
    }

    pub fn replaying(mut self) -> Self {
        self.replay_all = true;
        self
    }

    pub fn push(&self, event: ChainEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn subscriptions(&self) -> Vec<u64> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn resolve_account(&self, address: &str) -> Result<AccountHandle, SourceError> {
        if self.hang_on_resolve {
            futures::future::pending::<()>().await;
        }
        Ok(AccountHandle {
            address: address.to_string(),
        })
    }

    async fn resolve_token_wallet(
        &self,
        _account: &AccountHandle,
        token_master: &str,
    ) -> Result<String, SourceError> {
        if token_master == USDT_MASTER {
            Ok(USDT_WALLET.to_string())
        } else {
            Err(SourceError::AccountNotFound(token_master.to_string()))
        }
    }

    async fn subscribe(
        &self,
        _account: &AccountHandle,
        after_sequence: u64,
    ) -> Result<EventStream, SourceError> {
        self.subscriptions.lock().unwrap().push(after_sequence);

        let events: Vec<_> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| self.replay_all || e.sequence > after_sequence)
            .cloned()
            .map(Ok)
            .collect();

        let script = stream::iter(events);
        Ok(if self.end_stream {
            script.boxed()
        } else {
            script.chain(stream::pending()).boxed()
        })
    }
}

/// Sink remembering every paid notification
#[derive(Default)]
pub struct RecordingSink {
    pub paid: Mutex<Vec<(String, u64)>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.paid.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn on_paid(
        &self,
        transaction: &Transaction,
        invoice: &Invoice,
        _wallet: &Wallet,
    ) -> anyhow::Result<()> {
        self.paid
            .lock()
            .unwrap()
            .push((invoice.memo.clone(), transaction.id));
        Ok(())
    }
}

/// Ledger with TON and USDT coins and one active wallet
pub struct Ledger {
    pub store: Arc<Storage>,
    pub ton: Coin,
    pub usdt: Option<Coin>,
    pub wallet: Wallet,
    _dir: tempfile::TempDir,
}

pub fn ledger() -> Ledger {
    ledger_with(true)
}

pub fn ledger_with(with_usdt: bool) -> Ledger {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LedgerConfig::default();
    config.data_dir = dir.path().to_path_buf();
    let store = Arc::new(Storage::open(&config).unwrap());

    let ton = store
        .insert_coin(NewCoin {
            name: "Toncoin".to_string(),
            network: NETWORK.to_string(),
            unit: "TON".to_string(),
            unit_factor: 1_000_000_000,
        })
        .unwrap();
    let usdt = with_usdt.then(|| {
        store
            .insert_coin(NewCoin {
                name: "Tether USD".to_string(),
                network: NETWORK.to_string(),
                unit: "USDT".to_string(),
                unit_factor: 1_000_000,
            })
            .unwrap()
    });
    let wallet = store
        .insert_wallet(NewWallet {
            address: WALLET.to_string(),
            network: NETWORK.to_string(),
            status: WalletStatus::Active,
        })
        .unwrap();

    Ledger {
        store,
        ton,
        usdt,
        wallet,
        _dir: dir,
    }
}

pub fn network() -> NetworkConfig {
    NetworkConfig {
        name: NETWORK.to_string(),
        native_unit: "TON".to_string(),
        tokens: vec![TokenConfig {
            unit: "USDT".to_string(),
            master_address: USDT_MASTER.to_string(),
        }],
    }
}

pub fn listener_config() -> ListenerConfig {
    ListenerConfig {
        startup_timeout_ms: 2_000,
        event_buffer: 4,
        persist_initial_backoff_ms: 5,
        persist_max_backoff_ms: 20,
        persist_max_elapsed_ms: 200,
    }
}

pub fn listener(
    ledger: &Ledger,
    source: Arc<ScriptedSource>,
    broker: Arc<dyn delivery_queue::Broker>,
) -> ChainListener {
    ChainListener::new(
        ledger.wallet.clone(),
        network(),
        source,
        ledger.store.clone(),
        delivery_queue::Client::new(broker),
        DeliveryConfig::default(),
        listener_config(),
    )
}

fn event(sequence: u64, sender: &str, amount: u64, body: MessageBody) -> ChainEvent {
    ChainEvent {
        sequence,
        hash: format!("hash-{}", sequence),
        direction: Direction::Inbound,
        kind: MessageKind::Internal,
        bounced: false,
        sender: sender.to_string(),
        amount,
        body,
    }
}

/// Native transfer with a comment
pub fn native(sequence: u64, amount: u64, memo: &str) -> ChainEvent {
    event(
        sequence,
        "EQpayer",
        amount,
        MessageBody::Comment(Some(memo.to_string())),
    )
}

/// Token transfer notification from the wallet's USDT wallet
pub fn token(sequence: u64, amount: u64, memo: &str) -> ChainEvent {
    event(
        sequence,
        USDT_WALLET,
        50_000_000,
        MessageBody::Notification(TransferNotification {
            sender: "EQbuyer".to_string(),
            amount,
            memo: Some(memo.to_string()),
        }),
    )
}

/// Poll `condition` until it holds or the deadline passes
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Map of token wallet address to coin, as the listener resolves it
pub fn token_map(ledger: &Ledger) -> HashMap<String, Coin> {
    let mut tokens = HashMap::new();
    if let Some(usdt) = &ledger.usdt {
        tokens.insert(USDT_WALLET.to_string(), usdt.clone());
    }
    tokens
}
