//! Paywall
//!
//! Watches receiving wallets for incoming transfers, records them in the
//! ledger and settles the invoices they pay:
//! - Per-wallet chain listeners with crash-safe cursor resumption
//! - Classification of native and token transfers
//! - Idempotent recording into the ledger
//! - Durable delivery tasks reconciling invoices and notifying on payment
//!
//! The chain client is supplied through [`EventSource`] and the payment
//! callback through [`NotificationSink`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod listener;
pub mod metrics;
pub mod notify;
pub mod reconciler;
pub mod recorder;
pub mod runtime;
pub mod supervisor;
pub mod tasks;
pub mod telemetry;

pub use classifier::{Classification, Classifier};
pub use config::Config;
pub use error::{ListenerError, ReconcileError, Result};
pub use event::{
    AccountHandle, ChainEvent, Direction, EventSource, EventStream, MessageBody, MessageKind,
    SourceError, TransferNotification,
};
pub use listener::{ChainListener, ListenerConfig};
pub use notify::NotificationSink;
pub use reconciler::{Reconciler, Reconciliation};
pub use recorder::Recorder;
pub use runtime::Paywall;
pub use supervisor::{Supervisor, SupervisorConfig};
pub use tasks::{DeliveryHandler, DeliveryPayload, TYPE_TRANSACTION_DELIVERY};
