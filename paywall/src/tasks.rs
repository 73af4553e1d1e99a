//! Delivery task: reconcile the invoice paid by a recorded transfer

use crate::config::DeliveryConfig;
use crate::error::ReconcileError;
use crate::reconciler::Reconciler;
use async_trait::async_trait;
use delivery_queue::{Handler, HandlerError, Task};
use ledger_core::{Transaction, Wallet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Task type for transfer delivery
pub const TYPE_TRANSACTION_DELIVERY: &str = "transaction:delivery";

/// Delivery task payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    /// Recorded transfer
    pub transaction: Transaction,
    /// Receiving wallet
    pub wallet: Wallet,
}

/// Build a delivery task for a recorded transfer
pub fn new_delivery_task(
    transaction: &Transaction,
    wallet: &Wallet,
    options: &DeliveryConfig,
) -> serde_json::Result<Task> {
    let payload = DeliveryPayload {
        transaction: transaction.clone(),
        wallet: wallet.clone(),
    };
    Ok(Task::json(TYPE_TRANSACTION_DELIVERY, &payload)?
        .with_queue(options.queue.clone())
        .with_max_retry(options.max_retry)
        .with_timeout(Duration::from_secs(options.timeout_secs)))
}

/// Handles `transaction:delivery` tasks
#[derive(Debug, Clone)]
pub struct DeliveryHandler {
    reconciler: Arc<Reconciler>,
}

impl DeliveryHandler {
    /// Create a handler over a reconciler
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl Handler for DeliveryHandler {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let payload: DeliveryPayload = task
            .decode()
            .map_err(|e| HandlerError::skip(format!("malformed delivery payload: {}", e)))?;
        let tx = &payload.transaction;

        match self.reconciler.apply(tx, &payload.wallet).await {
            Ok(None) => {
                debug!(tx = tx.id, memo = %tx.memo, "No invoice to reconcile");
                Ok(())
            }
            Ok(Some(outcome)) => {
                info!(
                    tx = tx.id,
                    memo = %tx.memo,
                    status = %outcome.invoice.status,
                    total = outcome.total,
                    notified = outcome.notified,
                    "Invoice reconciled"
                );
                Ok(())
            }
            Err(e) if e.is_validation() => {
                warn!(tx = tx.id, memo = %tx.memo, "Transfer rejected: {}", e);
                Ok(())
            }
            Err(e @ ReconcileError::Unsupported { .. }) => {
                error!(tx = tx.id, memo = %tx.memo, "{}", e);
                Err(HandlerError::skip(e))
            }
            Err(e) => Err(HandlerError::failed(e)),
        }
    }
}
