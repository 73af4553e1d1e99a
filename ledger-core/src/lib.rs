//! Paywall Ledger Core
//!
//! Append-only store for the entities the payment pipeline reconciles:
//! settlement coins, monitored wallets, recorded transfers and invoices.
//!
//! # Architecture
//!
//! - **Write-once transactions**: rows are inserted by the recorder and never
//!   updated or deleted; `(source, destination, sequence)` is the natural key
//! - **Versioned invoices**: status writes are compare-and-swap on a version
//!   counter so concurrent reconcilers cannot lose updates
//! - **Static schema**: column families come from one ordered table list,
//!   opened by a single migration runner at startup
//!
//! # Invariants
//!
//! - A memo identifies at most one invoice
//! - Replaying a transfer with a recorded sequence never creates a second row
//! - `expired` and `cancelled` invoices never accept further payments

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod memo;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use storage::Storage;
pub use store::{LedgerStore, RecordOutcome};
pub use types::{
    Coin, Invoice, InvoiceStatus, NewCoin, NewInvoice, NewTransaction, NewWallet, Transaction,
    Wallet, WalletStatus,
};
