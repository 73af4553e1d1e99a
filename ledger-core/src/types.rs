//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer smallest-unit amounts)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement asset reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Row ID
    pub id: u64,
    /// Human readable name
    pub name: String,
    /// Network the asset lives on (e.g. "TON")
    pub network: String,
    /// Unit symbol (e.g. "USDT")
    pub unit: String,
    /// Smallest units per whole unit
    pub unit_factor: u64,
}

/// Coin before insertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCoin {
    /// Human readable name
    pub name: String,
    /// Network the asset lives on
    pub network: String,
    /// Unit symbol
    pub unit: String,
    /// Smallest units per whole unit
    pub unit_factor: u64,
}

/// Wallet status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    /// Not in use
    Undefined,
    /// Receiving payments, monitored by a listener
    Active,
    /// Standby
    Reserve,
}

impl WalletStatus {
    /// Storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Undefined => "undefined",
            WalletStatus::Active => "active",
            WalletStatus::Reserve => "reserve",
        }
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitored receiving account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Row ID
    pub id: u64,
    /// On-chain address
    pub address: String,
    /// Network name
    pub network: String,
    /// Status
    pub status: WalletStatus,
}

/// Wallet before insertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWallet {
    /// On-chain address
    pub address: String,
    /// Network name
    pub network: String,
    /// Status
    pub status: WalletStatus,
}

/// Recorded transfer (append-only ledger row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Row ID
    pub id: u64,
    /// Sender address
    pub src_addr: String,
    /// Receiving wallet address
    pub dst_addr: String,
    /// Coin reference
    pub coin_id: u64,
    /// Amount in smallest units
    pub amount: u64,
    /// Chain hash
    pub tx_hash: String,
    /// Correlation tag
    pub memo: String,
    /// Chain sequence number (cursor and dedup key)
    pub sequence: u64,
    /// Recorded at
    pub created_at: DateTime<Utc>,
}

/// Transfer before insertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    /// Sender address
    pub src_addr: String,
    /// Receiving wallet address
    pub dst_addr: String,
    /// Coin reference
    pub coin_id: u64,
    /// Amount in smallest units
    pub amount: u64,
    /// Chain hash
    pub tx_hash: String,
    /// Correlation tag
    pub memo: String,
    /// Chain sequence number
    pub sequence: u64,
}

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceStatus {
    /// Waiting for payment
    #[serde(rename = "pending")]
    Pending,
    /// Some payment received, below price
    #[serde(rename = "half-paid")]
    HalfPaid,
    /// Cumulative payments reached the price
    #[serde(rename = "paid")]
    Paid,
    /// Expiry passed before full payment
    #[serde(rename = "expired")]
    Expired,
    /// Cancelled administratively
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl InvoiceStatus {
    /// Status string
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::HalfPaid => "half-paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Expired => "expired",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Expired and cancelled invoices accept no further payments
    pub fn is_closed(&self) -> bool {
        matches!(self, InvoiceStatus::Expired | InvoiceStatus::Cancelled)
    }

    /// Still waiting for (more) payment
    pub fn is_open(&self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::HalfPaid)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Row ID
    pub id: u64,
    /// Unique correlation tag
    pub memo: String,
    /// Current status
    pub status: InvoiceStatus,
    /// Price in smallest units of `coin_id`
    pub price: u64,
    /// Designated coin
    pub coin_id: u64,
    /// Whether payments in other coins are accepted
    pub accept_others: bool,
    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
    /// Optimistic concurrency version
    pub version: u64,
    /// Paid notification delivered to the sink
    #[serde(default)]
    pub paid_notified: bool,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Whether the expiry has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Move to `cancelled`; only open invoices can be cancelled
    pub fn cancel(&mut self) -> crate::Result<()> {
        if !self.status.is_open() {
            return Err(crate::Error::InvalidTransition {
                from: self.status,
                to: InvoiceStatus::Cancelled,
            });
        }
        self.status = InvoiceStatus::Cancelled;
        Ok(())
    }
}

/// Invoice before insertion (memo is allocated by the store)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    /// Price in smallest units
    pub price: u64,
    /// Designated coin
    pub coin_id: u64,
    /// Accept other coins
    pub accept_others: bool,
    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
}
