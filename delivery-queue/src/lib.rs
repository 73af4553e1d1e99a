//! Delivery Queue
//!
//! Durable task transport with:
//! - Named priority queues with relative weights
//! - Fixed-size worker pool dispatching by task type
//! - Per-task retry budget and execution timeout
//! - Archive of skipped and exhausted tasks for manual inspection
//! - JetStream persistence, or an in-process broker for embedded use and tests
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod broker;
pub mod client;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod metrics;
pub mod server;
pub mod task;
pub mod types;

pub use broker::{Acknowledger, ArchivedTask, Broker, Delivery};
pub use client::{Client, ClientConfig};
pub use error::{Error, HandlerError, Result};
pub use jetstream::{JetStreamBroker, JetStreamConfig};
pub use memory::MemoryBroker;
pub use server::{Handler, ServeMux, Server, ServerConfig};
pub use task::{Task, TaskInfo};
pub use types::QueueWeights;
