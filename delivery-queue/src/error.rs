//! Error types for the delivery queue

use thiserror::Error;

/// Delivery queue error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Enqueue error
    #[error("Enqueue error: {0}")]
    Enqueue(String),

    /// Dequeue error
    #[error("Dequeue error: {0}")]
    Dequeue(String),

    /// Acknowledgement error
    #[error("Ack error: {0}")]
    Ack(String),

    /// Stream or consumer setup error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Unknown queue name
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed handler invocation
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Do not retry; archive the task
    #[error("skip retry: {0}")]
    SkipRetry(String),

    /// Retry while budget remains
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Non-retryable failure
    pub fn skip(reason: impl std::fmt::Display) -> Self {
        HandlerError::SkipRetry(reason.to_string())
    }

    /// Retryable failure
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        HandlerError::Failed(reason.to_string())
    }
}
