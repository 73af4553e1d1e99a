//! In-process broker
//!
//! Keeps queues in memory. Used for single-process deployments and tests;
//! tasks do not survive a restart. Only the queues the broker was built
//! with accept tasks.

use crate::{
    broker::{Acknowledger, ArchivedTask, Broker, Delivery},
    metrics::{QUEUE_ARCHIVED_TOTAL, QUEUE_ENQUEUE_TOTAL},
    task::Task,
    types::QueueWeights,
    Error, Result, TaskInfo,
};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    pending: HashMap<String, VecDeque<Task>>,
    scheduled: Vec<(Instant, Task)>,
    archived: Vec<ArchivedTask>,
    completed: u64,
}

impl State {
    /// Move due retries back onto their queues
    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.scheduled.len() {
            if self.scheduled[i].0 <= now {
                let (_, task) = self.scheduled.swap_remove(i);
                self.pending
                    .entry(task.queue.clone())
                    .or_default()
                    .push_back(task);
            } else {
                i += 1;
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.scheduled.iter().map(|(at, _)| *at).min()
    }

    fn pop(&mut self, order: &[String]) -> Option<Task> {
        order
            .iter()
            .find_map(|queue| self.pending.get_mut(queue).and_then(|q| q.pop_front()))
    }
}

/// In-memory broker
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    queues: Arc<Vec<String>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::with_queues(&QueueWeights::default())
    }
}

impl MemoryBroker {
    /// Create an empty broker serving the default queues
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty broker serving the queues in `weights`
    pub fn with_queues(weights: &QueueWeights) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            queues: Arc::new(weights.names()),
        }
    }

    /// Archived tasks
    pub fn archived(&self) -> Vec<ArchivedTask> {
        self.lock().archived.clone()
    }

    /// Tasks waiting on queues or scheduled for retry
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.pending.values().map(VecDeque::len).sum::<usize>() + state.scheduled.len()
    }

    /// Tasks completed so far
    pub fn completed(&self) -> u64 {
        self.lock().completed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    fn try_pop(&self, order: &[String]) -> (Option<Task>, Option<Instant>) {
        let mut state = self.lock();
        state.promote_due(Instant::now());
        let task = state.pop(order);
        (task, state.next_due())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, task: Task) -> Result<TaskInfo> {
        if !self.queues.contains(&task.queue) {
            QUEUE_ENQUEUE_TOTAL
                .with_label_values(&[task.queue.as_str(), "rejected"])
                .inc();
            return Err(Error::UnknownQueue(task.queue));
        }

        let info = TaskInfo {
            id: task.id,
            queue: task.queue.clone(),
        };
        debug!("Enqueue task {} ({}) on {}", task.id, task.task_type, task.queue);

        self.lock()
            .pending
            .entry(task.queue.clone())
            .or_default()
            .push_back(task);
        QUEUE_ENQUEUE_TOTAL.with_label_values(&[info.queue.as_str(), "success"]).inc();
        self.notify.notify_one();

        Ok(info)
    }

    async fn dequeue(&self, order: &[String], wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            let (task, next_due) = self.try_pop(order);

            if let Some(task) = task {
                let ack = MemoryAck {
                    broker: self.clone(),
                    task: task.clone(),
                };
                return Ok(Some(Delivery {
                    task,
                    ack: Box::new(ack),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}

struct MemoryAck {
    broker: MemoryBroker,
    task: Task,
}

#[async_trait]
impl Acknowledger for MemoryAck {
    async fn complete(self: Box<Self>) -> Result<()> {
        self.broker.lock().completed += 1;
        Ok(())
    }

    async fn retry(self: Box<Self>, delay: Duration, error: String) -> Result<()> {
        let mut task = self.task;
        task.retried += 1;
        task.last_error = Some(error);

        self.broker
            .lock()
            .scheduled
            .push((Instant::now() + delay, task));
        self.broker.notify.notify_one();
        Ok(())
    }

    async fn archive(self: Box<Self>, error: String) -> Result<()> {
        QUEUE_ARCHIVED_TOTAL
            .with_label_values(&[self.task.queue.as_str(), self.task.task_type.as_str()])
            .inc();
        self.broker
            .lock()
            .archived
            .push(ArchivedTask::new(self.task, error));
        Ok(())
    }
}
