//! Worker pool dispatching tasks to handlers by type
//!
//! Every delivered task is settled exactly once:
//! - handler success completes it
//! - `SkipRetry`, or an unknown task type, archives it
//! - failure, timeout or panic retries it with exponential delay while the
//!   task's retry budget lasts, then archives it

use crate::{
    broker::{Broker, Delivery},
    metrics::{TASKS_IN_FLIGHT, TASK_PROCESS_DURATION, TASK_PROCESS_TOTAL},
    task::Task,
    types::QueueWeights,
    HandlerError, Result,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Task handler
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one task
    async fn handle(&self, task: &Task) -> std::result::Result<(), HandlerError>;
}

/// Routes task types to handlers
#[derive(Default, Clone)]
pub struct ServeMux {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl std::fmt::Debug for ServeMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeMux")
            .field("task_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServeMux {
    /// Create an empty mux
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type, replacing any previous one
    pub fn handle(&mut self, task_type: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    /// Handler for a task type
    pub fn handler(&self, task_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(task_type).cloned()
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of concurrent workers
    pub concurrency: usize,

    /// Queues and their weights
    pub queues: QueueWeights,

    /// How long one dequeue waits for a task
    pub dequeue_wait: Duration,

    /// Delay before the first retry
    pub retry_base_delay: Duration,

    /// Retry delay cap
    pub retry_max_delay: Duration,

    /// Time allowed for in-flight tasks after shutdown is requested
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: QueueWeights::default(),
            dequeue_wait: Duration::from_secs(1),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Delay before retry number `retried + 1`
    pub fn retry_delay(&self, retried: u32) -> Duration {
        let factor = 2u32.saturating_pow(retried.min(31));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

/// Task processing server
pub struct Server {
    broker: Arc<dyn Broker>,
    config: ServerConfig,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("config", &self.config).finish()
    }
}

impl Server {
    /// Create a server over a broker
    pub fn new(broker: Arc<dyn Broker>, config: ServerConfig) -> Self {
        Self { broker, config }
    }

    /// Run workers until `cancel` fires, then drain in-flight tasks
    pub async fn run(&self, mux: ServeMux, cancel: CancellationToken) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        info!(
            "Starting task server ({} workers, queues {:?})",
            concurrency,
            self.config.queues.names()
        );

        let mux = Arc::new(mux);
        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            let broker = Arc::clone(&self.broker);
            let mux = Arc::clone(&mux);
            let config = self.config.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { worker_loop(worker_id, broker, mux, config, cancel).await });
        }

        cancel.cancelled().await;
        info!("Task server shutting down, draining in-flight tasks");

        let drain = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("Worker terminated abnormally: {}", e);
                }
            }
        };

        if tokio::time::timeout(self.config.shutdown_timeout, drain).await.is_err() {
            warn!(
                "Shutdown timeout {:?} elapsed; abandoning in-flight tasks",
                self.config.shutdown_timeout
            );
            workers.abort_all();
        }

        info!("Task server stopped");
        Ok(())
    }
}

async fn worker_loop(
    worker_id: usize,
    broker: Arc<dyn Broker>,
    mux: Arc<ServeMux>,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let order = config.queues.poll_order();
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = broker.dequeue(&order, config.dequeue_wait) => next,
        };

        match next {
            Ok(Some(delivery)) => process(&mux, &config, delivery).await,
            Ok(None) => {}
            Err(e) => {
                warn!("Worker {} dequeue failed: {}", worker_id, e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.dequeue_wait) => {}
                }
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

enum Outcome {
    Success,
    Skip(String),
    Failure(String),
}

/// Run one task and settle it
pub(crate) async fn process(mux: &ServeMux, config: &ServerConfig, delivery: Delivery) {
    let Delivery { task, ack } = delivery;

    let Some(handler) = mux.handler(&task.task_type) else {
        error!("No handler registered for task type {}", task.task_type);
        record(&task.task_type, "unhandled");
        if let Err(e) = ack
            .archive(format!("no handler for task type {}", task.task_type))
            .await
        {
            error!("Failed to archive task {}: {}", task.id, e);
        }
        return;
    };

    let start = Instant::now();
    TASKS_IN_FLIGHT.inc();
    let result = tokio::time::timeout(
        task.timeout(),
        AssertUnwindSafe(handler.handle(&task)).catch_unwind(),
    )
    .await;
    TASKS_IN_FLIGHT.dec();
    TASK_PROCESS_DURATION
        .with_label_values(&[task.task_type.as_str()])
        .observe(start.elapsed().as_secs_f64());

    let outcome = match result {
        Ok(Ok(Ok(()))) => Outcome::Success,
        Ok(Ok(Err(HandlerError::SkipRetry(reason)))) => Outcome::Skip(reason),
        Ok(Ok(Err(HandlerError::Failed(reason)))) => Outcome::Failure(reason),
        Ok(Err(panic)) => Outcome::Failure(format!("handler panicked: {}", panic_message(&*panic))),
        Err(_) => Outcome::Failure(format!("timed out after {:?}", task.timeout())),
    };

    let settled = match outcome {
        Outcome::Success => {
            record(&task.task_type, "success");
            ack.complete().await
        }
        Outcome::Skip(reason) => {
            warn!("Task {} ({}) skipped retry: {}", task.id, task.task_type, reason);
            record(&task.task_type, "skipped");
            ack.archive(reason).await
        }
        Outcome::Failure(reason) if task.can_retry() => {
            let delay = config.retry_delay(task.retried);
            warn!(
                "Task {} ({}) failed, retry {}/{} in {:?}: {}",
                task.id,
                task.task_type,
                task.retried + 1,
                task.max_retry,
                delay,
                reason
            );
            record(&task.task_type, "retry");
            ack.retry(delay, reason).await
        }
        Outcome::Failure(reason) => {
            error!(
                "Task {} ({}) exhausted {} retries: {}",
                task.id, task.task_type, task.max_retry, reason
            );
            record(&task.task_type, "exhausted");
            ack.archive(reason).await
        }
    };

    if let Err(e) = settled {
        // Unsettled tasks are redelivered by the broker
        error!("Failed to settle task {}: {}", task.id, e);
    }
}

fn record(task_type: &str, outcome: &str) {
    TASK_PROCESS_TOTAL.with_label_values(&[task_type, outcome]).inc();
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
