//! Error types for the payment pipeline

use crate::event::SourceError;
use ledger_core::InvoiceStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for listener operations
pub type Result<T> = std::result::Result<T, ListenerError>;

/// Chain listener errors
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Startup did not finish in time
    #[error("Listener startup timed out after {0:?}")]
    StartupTimeout(Duration),

    /// Required coin reference row is missing
    #[error("Coin {unit} not found on network {network}")]
    MissingCoin {
        /// Network name
        network: String,
        /// Unit symbol
        unit: String,
    },

    /// Event source failure
    #[error("Event source error: {0}")]
    Source(#[from] SourceError),

    /// Ledger failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Delivery queue failure
    #[error("Queue error: {0}")]
    Queue(#[from] delivery_queue::Error),

    /// Task payload encoding failure
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Event stream ended without cancellation
    #[error("Event stream ended unexpectedly")]
    StreamEnded,

    /// Transfer could not be recorded and enqueued within the retry budget
    #[error("Failed to persist transfer at sequence {sequence}: {reason}")]
    PersistFailed {
        /// Event sequence number
        sequence: u64,
        /// Last error
        reason: String,
    },
}

impl ListenerError {
    /// Fatal errors stop the wallet's listener instead of restarting it
    pub fn is_fatal(&self) -> bool {
        matches!(self, ListenerError::MissingCoin { .. })
    }
}

/// Invoice reconciliation errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Invoice no longer accepts payments
    #[error("Invoice {memo} is {status}")]
    InvoiceClosed {
        /// Invoice memo
        memo: String,
        /// Terminal status
        status: InvoiceStatus,
    },

    /// Transfer is in a different coin than the invoice
    #[error("Invoice {memo} expects coin {expected}, got {actual}")]
    CoinMismatch {
        /// Invoice memo
        memo: String,
        /// Invoice coin
        expected: u64,
        /// Transfer coin
        actual: u64,
    },

    /// Invoice accepts other coins but no conversion exists
    #[error("Invoice {memo} accepts other coins; conversion from coin {coin} is not supported")]
    Unsupported {
        /// Invoice memo
        memo: String,
        /// Transfer coin
        coin: u64,
    },

    /// Ledger failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Notification sink failure
    #[error("Notification failed: {0:#}")]
    Notify(anyhow::Error),

    /// Concurrent writers kept winning the version check
    #[error("Invoice {memo} still conflicting after {attempts} attempts")]
    Contention {
        /// Invoice memo
        memo: String,
        /// Attempts made
        attempts: u32,
    },
}

impl ReconcileError {
    /// Business rule rejections; never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvoiceClosed { .. } | ReconcileError::CoinMismatch { .. }
        )
    }
}
