//! Broker abstraction
//!
//! A broker persists tasks per queue and hands them out one at a time. Each
//! delivered task carries an acknowledger that settles it exactly once:
//! complete, retry after a delay, or archive.

use crate::{task::Task, Result, TaskInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settles a delivered task
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Task finished; remove it
    async fn complete(self: Box<Self>) -> Result<()>;

    /// Redeliver after `delay` with the retry counter bumped
    async fn retry(self: Box<Self>, delay: Duration, error: String) -> Result<()>;

    /// Move to the archive; never redelivered
    async fn archive(self: Box<Self>, error: String) -> Result<()>;
}

/// A task handed out by a broker
pub struct Delivery {
    /// The task, with `retried` reflecting prior attempts
    pub task: Task,
    /// Settlement handle
    pub ack: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery").field("task", &self.task).finish()
    }
}

/// Task persistence and hand-out
#[async_trait]
pub trait Broker: Send + Sync {
    /// Persist a task on its queue
    async fn enqueue(&self, task: Task) -> Result<TaskInfo>;

    /// Take the next ready task, trying queues in `order`
    ///
    /// Waits up to `wait` when nothing is ready; returns `None` on timeout.
    async fn dequeue(&self, order: &[String], wait: Duration) -> Result<Option<Delivery>>;
}

/// Archived task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedTask {
    /// The task as last delivered
    pub task: Task,
    /// Reason for archiving
    pub error: String,
    /// Archive time
    pub archived_at: DateTime<Utc>,
}

impl ArchivedTask {
    /// Record a task as archived now
    pub fn new(mut task: Task, error: String) -> Self {
        task.last_error = Some(error.clone());
        Self {
            task,
            error,
            archived_at: Utc::now(),
        }
    }
}
