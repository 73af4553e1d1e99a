//! Transfer classification
//!
//! Turns a raw chain event into a normalized ledger record, or explains why
//! it was ignored. Pure; no I/O.

use crate::event::{ChainEvent, Direction, MessageBody, MessageKind};
use ledger_core::{Coin, NewTransaction};
use std::collections::HashMap;

/// Why an event produced no transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by the monitored account
    Outbound,
    /// Not an internal message
    External,
    /// Value returned to the sender
    Bounced,
    /// Nothing of value attached
    ZeroAmount,
    /// Token wallet message without a transfer notification
    UndecodablePayload,
}

impl IgnoreReason {
    /// Label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::Outbound => "outbound",
            IgnoreReason::External => "external",
            IgnoreReason::Bounced => "bounced",
            IgnoreReason::ZeroAmount => "zero_amount",
            IgnoreReason::UndecodablePayload => "undecodable",
        }
    }
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Native coin transfer
    Native(NewTransaction),
    /// Token transfer reported by one of the account's token wallets
    Token(NewTransaction),
    /// Not a transfer into the account
    Ignored(IgnoreReason),
}

impl Classification {
    /// Label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Native(_) => "native",
            Classification::Token(_) => "token",
            Classification::Ignored(reason) => reason.as_str(),
        }
    }

    /// The normalized record, if any
    pub fn into_transfer(self) -> Option<NewTransaction> {
        match self {
            Classification::Native(tx) | Classification::Token(tx) => Some(tx),
            Classification::Ignored(_) => None,
        }
    }
}

/// Classifier bound to one receiving wallet
#[derive(Debug, Clone)]
pub struct Classifier {
    wallet_address: String,
    native: Coin,
    /// Token wallet address -> token coin
    tokens: HashMap<String, Coin>,
}

impl Classifier {
    /// Create a classifier for `wallet_address`
    pub fn new(wallet_address: impl Into<String>, native: Coin, tokens: HashMap<String, Coin>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            native,
            tokens,
        }
    }

    /// Wallet this classifier attributes transfers to
    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    /// Classify one event
    pub fn classify(&self, event: &ChainEvent) -> Classification {
        if event.direction != Direction::Inbound {
            return Classification::Ignored(IgnoreReason::Outbound);
        }
        if event.kind != MessageKind::Internal {
            return Classification::Ignored(IgnoreReason::External);
        }
        if event.bounced {
            return Classification::Ignored(IgnoreReason::Bounced);
        }

        if let Some(coin) = self.tokens.get(&event.sender) {
            return match &event.body {
                MessageBody::Notification(note) if note.amount > 0 => {
                    Classification::Token(NewTransaction {
                        src_addr: note.sender.clone(),
                        dst_addr: self.wallet_address.clone(),
                        coin_id: coin.id,
                        amount: note.amount,
                        tx_hash: event.hash.clone(),
                        memo: note.memo.clone().unwrap_or_default(),
                        sequence: event.sequence,
                    })
                }
                MessageBody::Notification(_) => Classification::Ignored(IgnoreReason::ZeroAmount),
                _ => Classification::Ignored(IgnoreReason::UndecodablePayload),
            };
        }

        if event.amount == 0 {
            return Classification::Ignored(IgnoreReason::ZeroAmount);
        }

        let memo = match &event.body {
            MessageBody::Comment(Some(comment)) => comment.clone(),
            _ => String::new(),
        };

        Classification::Native(NewTransaction {
            src_addr: event.sender.clone(),
            dst_addr: self.wallet_address.clone(),
            coin_id: self.native.id,
            amount: event.amount,
            tx_hash: event.hash.clone(),
            memo,
            sequence: event.sequence,
        })
    }
}
