//! Invoice reconciliation
//!
//! Recomputes an invoice's status from every ledger transfer carrying its
//! memo. Reconciliation of one memo is serialized by an in-process lock and
//! guarded across processes by the invoice version check; a conflicting
//! write restarts the evaluation from a fresh read.
//!
//! Status rules, in order:
//! 1. An open invoice past its expiry becomes `expired`.
//! 2. `expired` and `cancelled` invoices reject the transfer.
//! 3. A transfer in another coin is rejected, or reported as unsupported
//!    when the invoice accepts other coins.
//! 4. The sum of matching-coin transfers decides `paid` or `half-paid`.
//!
//! The sink is called while the invoice is `paid` and not yet marked
//! notified; the mark is written after the sink returns.

use crate::error::ReconcileError;
use crate::metrics::{INVOICES_PAID_TOTAL, RECONCILE_TOTAL};
use crate::notify::NotificationSink;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ledger_core::{Invoice, InvoiceStatus, LedgerStore, Transaction, Wallet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_MAX_CONFLICTS: u32 = 8;

/// Result of applying a transfer to its invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Invoice as persisted
    pub invoice: Invoice,
    /// Status before this transfer was applied
    pub previous: InvoiceStatus,
    /// Sum of matching-coin transfers for the memo
    pub total: u64,
    /// Amount received beyond the price
    pub overpaid: u64,
    /// Whether the sink was called during this application
    pub notified: bool,
}

/// Applies recorded transfers to invoices
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    sink: Arc<dyn NotificationSink>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_conflicts: u32,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("locked_memos", &self.locks.len())
            .field("max_conflicts", &self.max_conflicts)
            .finish()
    }
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(store: Arc<dyn LedgerStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            sink,
            locks: DashMap::new(),
            max_conflicts: DEFAULT_MAX_CONFLICTS,
        }
    }

    /// Apply `tx` to the invoice sharing its memo
    ///
    /// Returns `None` when the transfer carries no memo or no invoice has it.
    pub async fn apply(
        &self,
        tx: &Transaction,
        wallet: &Wallet,
    ) -> Result<Option<Reconciliation>, ReconcileError> {
        self.apply_at(tx, wallet, Utc::now()).await
    }

    /// Apply `tx` as of `now`
    pub async fn apply_at(
        &self,
        tx: &Transaction,
        wallet: &Wallet,
        now: DateTime<Utc>,
    ) -> Result<Option<Reconciliation>, ReconcileError> {
        if tx.memo.is_empty() {
            return Ok(None);
        }

        let lock = self
            .locks
            .entry(tx.memo.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.apply_locked(tx, wallet, now).await
        };

        drop(lock);
        self.locks
            .remove_if(&tx.memo, |_, lock| Arc::strong_count(lock) == 1);

        let outcome = match &result {
            Ok(None) => "no_invoice",
            Ok(Some(r)) => r.invoice.status.as_str(),
            Err(e) if e.is_validation() => "rejected",
            Err(ReconcileError::Unsupported { .. }) => "unsupported",
            Err(_) => "error",
        };
        RECONCILE_TOTAL.with_label_values(&[outcome]).inc();

        result
    }

    async fn apply_locked(
        &self,
        tx: &Transaction,
        wallet: &Wallet,
        now: DateTime<Utc>,
    ) -> Result<Option<Reconciliation>, ReconcileError> {
        for attempt in 1..=self.max_conflicts {
            let Some(invoice) = self.store.invoice_by_memo(&tx.memo)? else {
                debug!(memo = %tx.memo, "No invoice for memo");
                return Ok(None);
            };

            match self.evaluate(invoice, tx, wallet, now).await {
                Err(ReconcileError::Ledger(ledger_core::Error::VersionConflict { .. })) => {
                    debug!(memo = %tx.memo, attempt, "Invoice changed concurrently, re-reading");
                }
                other => return other.map(Some),
            }
        }

        Err(ReconcileError::Contention {
            memo: tx.memo.clone(),
            attempts: self.max_conflicts,
        })
    }

    async fn evaluate(
        &self,
        mut invoice: Invoice,
        tx: &Transaction,
        wallet: &Wallet,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, ReconcileError> {
        let previous = invoice.status;

        if invoice.status.is_open() && invoice.is_expired_at(now) {
            invoice.status = InvoiceStatus::Expired;
            self.store.update_invoice(&invoice)?;
            info!(memo = %invoice.memo, "Invoice expired");
        }

        if invoice.status.is_closed() {
            return Err(ReconcileError::InvoiceClosed {
                memo: invoice.memo,
                status: invoice.status,
            });
        }

        if tx.coin_id != invoice.coin_id {
            return Err(if invoice.accept_others {
                ReconcileError::Unsupported {
                    memo: invoice.memo,
                    coin: tx.coin_id,
                }
            } else {
                ReconcileError::CoinMismatch {
                    memo: invoice.memo,
                    expected: invoice.coin_id,
                    actual: tx.coin_id,
                }
            });
        }

        let total = self
            .store
            .transactions_by_memo(&invoice.memo)?
            .iter()
            .filter(|t| t.coin_id == invoice.coin_id)
            .fold(0u64, |sum, t| sum.saturating_add(t.amount));

        invoice.status = if total >= invoice.price {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::HalfPaid
        };
        let overpaid = total.saturating_sub(invoice.price);

        let mut stored = self.store.update_invoice(&invoice)?;

        let mut notified = false;
        if stored.status == InvoiceStatus::Paid && !stored.paid_notified {
            self.sink
                .on_paid(tx, &stored, wallet)
                .await
                .map_err(ReconcileError::Notify)?;

            stored.paid_notified = true;
            stored = self.store.update_invoice(&stored)?;
            notified = true;
            INVOICES_PAID_TOTAL.inc();
            info!(memo = %stored.memo, total, price = stored.price, "Invoice paid");
        } else if previous == InvoiceStatus::Paid && overpaid > 0 {
            warn!(
                memo = %stored.memo,
                total,
                price = stored.price,
                overpaid,
                "Payment received for an already paid invoice"
            );
        }

        Ok(Reconciliation {
            invoice: stored,
            previous,
            total,
            overpaid,
            notified,
        })
    }
}
