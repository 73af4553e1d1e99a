//! Chain event model and the event source seam
//!
//! The concrete chain client (address parsing, proof checks, wire protocol
//! and payload decoding) lives behind [`EventSource`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message direction relative to the monitored account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Received by the account
    Inbound,
    /// Sent by the account
    Outbound,
}

/// Message origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Sent by another contract on chain
    Internal,
    /// Sent from outside the chain
    External,
}

/// Structured token transfer notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferNotification {
    /// Original sender of the tokens
    pub sender: String,
    /// Amount in smallest units
    pub amount: u64,
    /// Forwarded comment, if any
    pub memo: Option<String>,
}

/// Decoded message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Plain text comment
    Comment(Option<String>),
    /// Token transfer notification
    Notification(TransferNotification),
    /// Payload the client could not decode
    Opaque,
}

/// One transaction on the monitored account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Per-account monotonically increasing sequence (logical time)
    pub sequence: u64,
    /// Transaction hash
    pub hash: String,
    /// Direction of the carried message
    pub direction: Direction,
    /// Internal or external message
    pub kind: MessageKind,
    /// Value bounced back to the sender
    pub bounced: bool,
    /// Message sender address
    pub sender: String,
    /// Attached native amount in smallest units
    pub amount: u64,
    /// Message body
    pub body: MessageBody,
}

/// Resolved on-chain account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountHandle {
    /// Canonical account address
    pub address: String,
}

/// Event source failures
#[derive(Debug, Error)]
pub enum SourceError {
    /// Account does not exist or cannot be parsed
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Connection to the chain failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Subscription could not be established or broke
    #[error("Subscription error: {0}")]
    Subscription(String),
}

/// Ordered stream of account events
pub type EventStream = BoxStream<'static, std::result::Result<ChainEvent, SourceError>>;

/// Per-account subscription to chain events
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Resolve an address to an account
    async fn resolve_account(&self, address: &str) -> std::result::Result<AccountHandle, SourceError>;

    /// Address of the account's token wallet for a token master contract
    async fn resolve_token_wallet(
        &self,
        account: &AccountHandle,
        token_master: &str,
    ) -> std::result::Result<String, SourceError>;

    /// Events with sequence strictly greater than `after_sequence`, in order
    async fn subscribe(
        &self,
        account: &AccountHandle,
        after_sequence: u64,
    ) -> std::result::Result<EventStream, SourceError>;
}
