//! Delivery handler outcomes and the assembled service end to end

mod common;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use delivery_queue::{Broker, Handler, HandlerError, MemoryBroker, Task};
use ledger_core::{
    Invoice, InvoiceStatus, LedgerStore, NewInvoice, NewTransaction, Transaction, Wallet,
};
use paywall::config::{ConfigError, DeliveryConfig, QueueBackend};
use paywall::runtime::RuntimeError;
use paywall::tasks::new_delivery_task;
use paywall::{Config, DeliveryHandler, NotificationSink, Paywall, Reconciler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sink that fails its first `failures` calls
#[derive(Default)]
struct FailingSink {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl NotificationSink for FailingSink {
    async fn on_paid(&self, _: &Transaction, _: &Invoice, _: &Wallet) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(anyhow!("merchant endpoint unavailable"))
        } else {
            Ok(())
        }
    }
}

fn handler(ledger: &Ledger, sink: Arc<dyn NotificationSink>) -> DeliveryHandler {
    DeliveryHandler::new(Arc::new(Reconciler::new(ledger.store.clone(), sink)))
}

fn open_invoice(ledger: &Ledger, price: u64, coin_id: u64, accept_others: bool) -> Invoice {
    ledger
        .store
        .create_invoice(NewInvoice {
            price,
            coin_id,
            accept_others,
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
        .unwrap()
}

fn delivery(ledger: &Ledger, memo: &str, coin_id: u64, amount: u64, sequence: u64) -> Task {
    let tx = ledger
        .store
        .record_transaction(NewTransaction {
            src_addr: "EQbuyer".to_string(),
            dst_addr: WALLET.to_string(),
            coin_id,
            amount,
            tx_hash: format!("hash-{}", sequence),
            memo: memo.to_string(),
            sequence,
        })
        .unwrap()
        .into_transaction();
    new_delivery_task(&tx, &ledger.wallet, &DeliveryConfig::default()).unwrap()
}

#[tokio::test]
async fn test_malformed_payload_is_not_retried() {
    let ledger = ledger();
    let handler = handler(&ledger, Arc::new(RecordingSink::default()));
    let task = Task::new(paywall::TYPE_TRANSACTION_DELIVERY, b"not json".to_vec());

    assert!(matches!(
        handler.handle(&task).await,
        Err(HandlerError::SkipRetry(_))
    ));
}

#[tokio::test]
async fn test_transfer_without_invoice_completes() {
    let ledger = ledger();
    let handler = handler(&ledger, Arc::new(RecordingSink::default()));
    let task = delivery(&ledger, "donation", ledger.ton.id, 100, 1);

    assert!(handler.handle(&task).await.is_ok());
}

#[tokio::test]
async fn test_rejected_transfer_completes() {
    let ledger = ledger();
    let usdt = ledger.usdt.clone().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let handler = handler(&ledger, sink.clone());
    let inv = open_invoice(&ledger, 1_000, usdt.id, false);

    let task = delivery(&ledger, &inv.memo, ledger.ton.id, 1_000, 1);
    assert!(handler.handle(&task).await.is_ok());
    assert_eq!(sink.count(), 0);
    assert_eq!(
        ledger.store.invoice_by_memo(&inv.memo).unwrap().unwrap().status,
        InvoiceStatus::Pending
    );
}

#[tokio::test]
async fn test_unsupported_coin_is_not_retried() {
    let ledger = ledger();
    let usdt = ledger.usdt.clone().unwrap();
    let handler = handler(&ledger, Arc::new(RecordingSink::default()));
    let inv = open_invoice(&ledger, 1_000, usdt.id, true);

    let task = delivery(&ledger, &inv.memo, ledger.ton.id, 1_000, 1);
    assert!(matches!(
        handler.handle(&task).await,
        Err(HandlerError::SkipRetry(_))
    ));
}

#[tokio::test]
async fn test_sink_failure_is_retried_until_delivered() {
    let ledger = ledger();
    let usdt = ledger.usdt.clone().unwrap();
    let sink = Arc::new(FailingSink {
        failures: 1,
        ..Default::default()
    });
    let handler = handler(&ledger, sink.clone());
    let inv = open_invoice(&ledger, 1_000, usdt.id, false);
    let task = delivery(&ledger, &inv.memo, usdt.id, 1_000, 1);

    assert!(matches!(
        handler.handle(&task).await,
        Err(HandlerError::Failed(_))
    ));
    // Paid is persisted even though the notification has not gone out
    let invoice = ledger.store.invoice_by_memo(&inv.memo).unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert!(!invoice.paid_notified);

    assert!(handler.handle(&task).await.is_ok());
    let invoice = ledger.store.invoice_by_memo(&inv.memo).unwrap().unwrap();
    assert!(invoice.paid_notified);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);

    assert!(handler.handle(&task).await.is_ok());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

fn service_config() -> Config {
    let mut config = Config::default();
    config.queue.backend = QueueBackend::Memory;
    config.networks = vec![network()];
    config.listener = listener_config();
    config.dispatcher.concurrency = 2;
    config.dispatcher.dequeue_wait_ms = 20;
    config.dispatcher.retry_base_delay_ms = 10;
    config.dispatcher.retry_max_delay_ms = 50;
    config.dispatcher.shutdown_timeout_ms = 1_000;
    config
}

#[tokio::test]
async fn test_token_payment_end_to_end() {
    let ledger = ledger();
    let usdt = ledger.usdt.clone().unwrap();
    let inv = open_invoice(&ledger, 1_000_000, usdt.id, false);

    let source = Arc::new(
        ScriptedSource::new(vec![
            token(1, 600_000, &inv.memo),
            native(2, 1_000, "unrelated"),
            token(3, 500_000, &inv.memo),
        ])
        .open_ended(),
    );
    let broker = MemoryBroker::new();
    let sink = Arc::new(RecordingSink::default());

    let paywall = Arc::new(
        Paywall::new(
            service_config(),
            ledger.store.clone(),
            Arc::new(broker.clone()) as Arc<dyn Broker>,
            sink.clone(),
        )
        .with_source(NETWORK, source.clone()),
    );
    assert_eq!(paywall.listeners().unwrap().len(), 1);

    let cancel = CancellationToken::new();
    let service = {
        let paywall = paywall.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { paywall.run(cancel).await })
    };

    let store = ledger.store.clone();
    let memo = inv.memo.clone();
    eventually(|| {
        store
            .invoice_by_memo(&memo)
            .unwrap()
            .map(|i| i.paid_notified)
            .unwrap_or(false)
    })
    .await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let invoice = ledger.store.invoice_by_memo(&inv.memo).unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(sink.count(), 1);
    assert_eq!(ledger.store.transactions_by_memo(&inv.memo).unwrap().len(), 2);
    assert_eq!(source.subscriptions(), vec![0]);
    assert!(broker.archived().is_empty());
}

#[tokio::test]
async fn test_run_rejects_unpolled_delivery_queue() {
    let ledger = ledger();
    let broker = MemoryBroker::new();
    let mut config = service_config();
    config.delivery.queue = "bulk".to_string();

    let paywall = Paywall::new(
        config,
        ledger.store.clone(),
        Arc::new(broker.clone()) as Arc<dyn Broker>,
        Arc::new(RecordingSink::default()),
    )
    .with_source(NETWORK, Arc::new(ScriptedSource::new(vec![native(1, 1_000, "m")])));

    let result = paywall.run(CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(RuntimeError::Config(ConfigError::Invalid(_)))
    ));
    assert!(ledger.store.transactions_by_memo("m").unwrap().is_empty());
    assert_eq!(broker.pending(), 0);
}
