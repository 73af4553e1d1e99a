//! Payment notification seam

use async_trait::async_trait;
use ledger_core::{Invoice, Transaction, Wallet};

/// Receives invoices that became paid
///
/// Delivery is at-least-once: a retried task may call `on_paid` again for
/// the same invoice, so implementations must tolerate duplicates. An error
/// fails the delivery task and it is retried.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// `transaction` completed payment of `invoice` into `wallet`
    async fn on_paid(
        &self,
        transaction: &Transaction,
        invoice: &Invoice,
        wallet: &Wallet,
    ) -> anyhow::Result<()>;
}
