//! Store abstraction consumed by the payment pipeline

use crate::{
    types::{
        Coin, Invoice, NewCoin, NewInvoice, NewTransaction, NewWallet, Transaction, Wallet,
        WalletStatus,
    },
    Result,
};

/// Outcome of recording a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New row written
    Inserted(Transaction),
    /// Row with the same (source, destination, sequence) already existed
    Duplicate(Transaction),
}

impl RecordOutcome {
    /// The stored transaction, new or pre-existing
    pub fn transaction(&self) -> &Transaction {
        match self {
            RecordOutcome::Inserted(tx) | RecordOutcome::Duplicate(tx) => tx,
        }
    }

    /// Consume into the stored transaction
    pub fn into_transaction(self) -> Transaction {
        match self {
            RecordOutcome::Inserted(tx) | RecordOutcome::Duplicate(tx) => tx,
        }
    }

    /// Whether this call created the row
    pub fn is_inserted(&self) -> bool {
        matches!(self, RecordOutcome::Inserted(_))
    }
}

/// Entity store for coins, wallets, transactions and invoices.
///
/// Transactions are write-once. Invoice writes are version-checked.
pub trait LedgerStore: Send + Sync {
    /// Insert coin reference data
    fn insert_coin(&self, coin: NewCoin) -> Result<Coin>;

    /// Coin by id
    fn coin(&self, id: u64) -> Result<Option<Coin>>;

    /// Coin by network and unit symbol
    fn coin_by_unit(&self, network: &str, unit: &str) -> Result<Option<Coin>>;

    /// Insert a wallet
    fn insert_wallet(&self, wallet: NewWallet) -> Result<Wallet>;

    /// Wallets on `network` with `status`
    fn wallets_by_status(&self, network: &str, status: WalletStatus) -> Result<Vec<Wallet>>;

    /// Record a transfer; idempotent on (source, destination, sequence)
    fn record_transaction(&self, tx: NewTransaction) -> Result<RecordOutcome>;

    /// Highest-sequence transaction received by `dst_addr`
    fn latest_transaction(&self, dst_addr: &str) -> Result<Option<Transaction>>;

    /// All transactions carrying `memo`
    fn transactions_by_memo(&self, memo: &str) -> Result<Vec<Transaction>>;

    /// Create an invoice under a freshly allocated unique memo
    fn create_invoice(&self, invoice: NewInvoice) -> Result<Invoice>;

    /// Invoice by memo
    fn invoice_by_memo(&self, memo: &str) -> Result<Option<Invoice>>;

    /// Persist invoice changes if `invoice.version` is still current.
    ///
    /// Returns the stored invoice with the bumped version.
    fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice>;

    /// Cancel an open invoice
    fn cancel_invoice(&self, memo: &str) -> Result<Invoice>;
}
