//! JetStream-backed broker
//!
//! Provides durable task delivery with:
//! - A work-queue stream holding every queue's subject
//! - One durable pull consumer per queue
//! - Delayed redelivery via NAK with delay
//! - An archive stream for skipped and exhausted tasks
//! - Deduplication on task ID

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy, PullConsumer},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    AckKind, Context as JetStreamContext,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    broker::{Acknowledger, ArchivedTask, Broker, Delivery},
    metrics::{QUEUE_ARCHIVED_TOTAL, QUEUE_ENQUEUE_TOTAL},
    task::Task,
    Error, Result, TaskInfo,
};

/// JetStream broker configuration
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    /// NATS server URL
    pub url: String,

    /// Prefix for stream names and subjects
    pub stream_prefix: String,

    /// Queues to provision consumers for
    pub queues: Vec<String>,

    /// Redelivery timeout for unacknowledged tasks; keep above the task timeout
    pub ack_wait: Duration,

    /// Deduplication window for task IDs
    pub duplicate_window: Duration,
}

impl Default for JetStreamConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_prefix: "paywall".to_string(),
            queues: vec!["critical".to_string(), "default".to_string(), "low".to_string()],
            ack_wait: Duration::from_secs(25 * 60),
            duplicate_window: Duration::from_secs(300),
        }
    }
}

/// Broker persisting tasks in JetStream
pub struct JetStreamBroker {
    context: JetStreamContext,
    prefix: String,
    consumers: HashMap<String, PullConsumer>,
}

impl std::fmt::Debug for JetStreamBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamBroker")
            .field("prefix", &self.prefix)
            .field("queues", &self.consumers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JetStreamBroker {
    /// Connect and provision streams and consumers
    pub async fn connect(config: &JetStreamConfig) -> Result<Self> {
        info!("Connecting to NATS JetStream at {}", config.url);

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let context = jetstream::new(client);
        let prefix = config.stream_prefix.clone();

        let tasks_stream = context
            .get_or_create_stream(StreamConfig {
                name: Self::stream_name(&prefix, "tasks"),
                description: Some("Pending delivery tasks".to_string()),
                subjects: vec![format!("{}.tasks.>", prefix)],
                retention: RetentionPolicy::WorkQueue,
                storage: StorageType::File,
                duplicate_window: config.duplicate_window,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::JetStream(e.to_string()))?;

        context
            .get_or_create_stream(StreamConfig {
                name: Self::stream_name(&prefix, "archived"),
                description: Some("Archived delivery tasks".to_string()),
                subjects: vec![format!("{}.archived.>", prefix)],
                retention: RetentionPolicy::Limits,
                max_age: Duration::from_secs(30 * 24 * 3600),
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::JetStream(e.to_string()))?;

        let mut consumers = HashMap::new();
        for queue in &config.queues {
            let name = format!("{}-{}", prefix, queue);
            let consumer = tasks_stream
                .get_or_create_consumer(
                    &name,
                    pull::Config {
                        durable_name: Some(name.clone()),
                        description: Some(format!("Workers for queue {}", queue)),
                        filter_subject: format!("{}.tasks.{}", prefix, queue),
                        ack_policy: AckPolicy::Explicit,
                        ack_wait: config.ack_wait,
                        // Retry budget is enforced per task by the server loop
                        max_deliver: -1,
                        deliver_policy: DeliverPolicy::All,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| Error::JetStream(e.to_string()))?;
            consumers.insert(queue.clone(), consumer);
        }

        info!(
            "JetStream broker ready ({} queues, prefix {})",
            consumers.len(),
            prefix
        );

        Ok(Self {
            context,
            prefix,
            consumers,
        })
    }

    fn stream_name(prefix: &str, kind: &str) -> String {
        format!("{}_{}", prefix, kind).to_uppercase()
    }

    fn consumer(&self, queue: &str) -> Result<&PullConsumer> {
        self.consumers
            .get(queue)
            .ok_or_else(|| Error::UnknownQueue(queue.to_string()))
    }

    async fn next_from(
        &self,
        queue: &str,
        wait: Option<Duration>,
    ) -> Result<Option<jetstream::Message>> {
        let consumer = self.consumer(queue)?;

        let mut batch = match wait {
            Some(wait) => consumer
                .batch()
                .max_messages(1)
                .expires(wait)
                .messages()
                .await
                .map_err(|e| Error::Dequeue(e.to_string()))?,
            None => consumer
                .fetch()
                .max_messages(1)
                .messages()
                .await
                .map_err(|e| Error::Dequeue(e.to_string()))?,
        };

        match batch.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(Error::Dequeue(e.to_string())),
            None => Ok(None),
        }
    }

    async fn into_delivery(&self, message: jetstream::Message) -> Result<Option<Delivery>> {
        let delivered = message
            .info()
            .map(|info| info.delivered)
            .map_err(|e| Error::Dequeue(e.to_string()))?;

        let mut task = match Task::from_bytes(&message.payload) {
            Ok(task) => task,
            Err(e) => {
                // Poison message: nothing can ever process it
                error!("Dropping undecodable task on {}: {}", message.subject, e);
                message
                    .ack_with(AckKind::Term)
                    .await
                    .map_err(|e| Error::Ack(e.to_string()))?;
                return Ok(None);
            }
        };
        task.retried = delivered.saturating_sub(1).max(0) as u32;

        Ok(Some(Delivery {
            task: task.clone(),
            ack: Box::new(JetStreamAck {
                context: self.context.clone(),
                archive_subject: format!("{}.archived.{}", self.prefix, task.queue),
                message,
                task,
            }),
        }))
    }
}

#[async_trait]
impl Broker for JetStreamBroker {
    async fn enqueue(&self, task: Task) -> Result<TaskInfo> {
        if !self.consumers.contains_key(&task.queue) {
            return Err(Error::UnknownQueue(task.queue));
        }

        let subject = format!("{}.tasks.{}", self.prefix, task.queue);
        let payload = task.to_bytes()?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", task.id.to_string().as_str());

        let result = async {
            self.context
                .publish_with_headers(subject.clone(), headers, Bytes::from(payload))
                .await
                .map_err(|e| Error::Enqueue(e.to_string()))?
                .await
                .map_err(|e| Error::Enqueue(e.to_string()))
        }
        .await;

        let status = if result.is_ok() { "success" } else { "error" };
        QUEUE_ENQUEUE_TOTAL
            .with_label_values(&[task.queue.as_str(), status])
            .inc();
        result?;

        debug!("Enqueued task {} ({}) to {}", task.id, task.task_type, subject);
        Ok(TaskInfo {
            id: task.id,
            queue: task.queue,
        })
    }

    async fn dequeue(&self, order: &[String], wait: Duration) -> Result<Option<Delivery>> {
        for queue in order {
            if let Some(message) = self.next_from(queue, None).await? {
                if let Some(delivery) = self.into_delivery(message).await? {
                    return Ok(Some(delivery));
                }
            }
        }

        let Some(first) = order.first() else {
            return Ok(None);
        };
        if wait.is_zero() {
            return Ok(None);
        }

        match self.next_from(first, Some(wait)).await? {
            Some(message) => self.into_delivery(message).await,
            None => Ok(None),
        }
    }
}

struct JetStreamAck {
    context: JetStreamContext,
    archive_subject: String,
    message: jetstream::Message,
    task: Task,
}

#[async_trait]
impl Acknowledger for JetStreamAck {
    async fn complete(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn retry(self: Box<Self>, delay: Duration, error: String) -> Result<()> {
        warn!(
            "Task {} failed (retry {} in {:?}): {}",
            self.task.id,
            self.task.retried + 1,
            delay,
            error
        );
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn archive(self: Box<Self>, error: String) -> Result<()> {
        let record = ArchivedTask::new(self.task.clone(), error);
        let payload = serde_json::to_vec(&record)?;

        // Archive first so a crash in between redelivers rather than loses
        self.context
            .publish(self.archive_subject.clone(), Bytes::from(payload))
            .await
            .map_err(|e| Error::Ack(e.to_string()))?
            .await
            .map_err(|e| Error::Ack(e.to_string()))?;

        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| Error::Ack(e.to_string()))?;

        QUEUE_ARCHIVED_TOTAL
            .with_label_values(&[self.task.queue.as_str(), self.task.task_type.as_str()])
            .inc();
        warn!("Task {} archived: {}", self.task.id, record.error);
        Ok(())
    }
}
