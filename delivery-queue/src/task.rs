//! Task envelope carried through brokers

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Default queue name
pub const DEFAULT_QUEUE: &str = "default";

/// Default retry budget
pub const DEFAULT_MAX_RETRY: u32 = 5;

/// Default execution timeout (20 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Unit of work dispatched to a handler by type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique task ID (UUIDv7, time-ordered)
    pub id: Uuid,

    /// Handler routing key
    pub task_type: String,

    /// JSON payload
    pub payload: Vec<u8>,

    /// Target queue
    pub queue: String,

    /// Maximum number of retries before archiving
    pub max_retry: u32,

    /// Retries performed so far
    pub retried: u32,

    /// Execution timeout in milliseconds
    pub timeout_ms: u64,

    /// Time the task was first enqueued
    pub enqueued_at: DateTime<Utc>,

    /// Error from the last failed attempt
    pub last_error: Option<String>,
}

impl Task {
    /// Create a task with a raw payload
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            queue: DEFAULT_QUEUE.to_string(),
            max_retry: DEFAULT_MAX_RETRY,
            retried: 0,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    /// Create a task with a JSON-encoded payload
    pub fn json<T: Serialize>(task_type: impl Into<String>, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::new(task_type, serde_json::to_vec(payload)?))
    }

    /// Route the task to a queue
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the retry budget
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Set the execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Execution timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Decode the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    /// Whether another retry is allowed
    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retry
    }

    /// Serialize to bytes for transport
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize from transport bytes
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Receipt returned by a successful enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task ID
    pub id: Uuid,
    /// Queue the task landed in
    pub queue: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn test_task_defaults() {
        let task = Task::new("ping", vec![]);
        assert_eq!(task.queue, DEFAULT_QUEUE);
        assert_eq!(task.max_retry, 5);
        assert_eq!(task.retried, 0);
        assert_eq!(task.timeout(), Duration::from_secs(1200));
        assert!(task.can_retry());
    }

    #[test]
    fn test_task_builders() {
        let task = Task::json("ping", &Ping { n: 7 })
            .unwrap()
            .with_queue("critical")
            .with_max_retry(0)
            .with_timeout(Duration::from_secs(3));

        assert_eq!(task.queue, "critical");
        assert!(!task.can_retry());
        assert_eq!(task.timeout_ms, 3000);
        assert_eq!(task.decode::<Ping>().unwrap(), Ping { n: 7 });
    }

    #[test]
    fn test_task_transport_encoding() {
        let mut task = Task::new("ping", b"{}".to_vec());
        task.last_error = Some("boom".to_string());

        let decoded = Task::from_bytes(&task.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, task);
    }
}
