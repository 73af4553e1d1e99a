//! Worker pool dispatch tests against the in-memory broker

use async_trait::async_trait;
use delivery_queue::{
    Client, Handler, HandlerError, MemoryBroker, QueueWeights, ServeMux, Server, ServerConfig,
    Task,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fails the first `failures` attempts, then succeeds
struct Flaky {
    failures: u32,
    attempts: AtomicU32,
}

#[async_trait]
impl Handler for Flaky {
    async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            Err(HandlerError::failed("temporary"))
        } else {
            Ok(())
        }
    }
}

struct Skipper;

#[async_trait]
impl Handler for Skipper {
    async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
        Err(HandlerError::skip("malformed"))
    }
}

struct Panicker;

#[async_trait]
impl Handler for Panicker {
    async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
        panic!("handler bug");
    }
}

struct Sleeper;

#[async_trait]
impl Handler for Sleeper {
    async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

fn fast_config() -> ServerConfig {
    ServerConfig {
        concurrency: 4,
        queues: QueueWeights::default(),
        dequeue_wait: Duration::from_millis(20),
        retry_base_delay: Duration::from_millis(5),
        retry_max_delay: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(1),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn start(broker: &MemoryBroker, mux: ServeMux) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let server = Server::new(Arc::new(broker.clone()), fast_config());
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        server.run(mux, token).await.unwrap();
    });
    (cancel, handle)
}

#[tokio::test]
async fn test_retry_then_success() {
    let broker = MemoryBroker::new();
    let flaky = Arc::new(Flaky {
        failures: 2,
        attempts: AtomicU32::new(0),
    });
    let mut mux = ServeMux::new();
    mux.handle("flaky", flaky.clone());

    let (cancel, handle) = start(&broker, mux).await;
    let client = Client::new(Arc::new(broker.clone()));
    client.enqueue(Task::new("flaky", vec![])).await.unwrap();

    wait_until(|| broker.completed() == 1).await;
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    assert!(broker.archived().is_empty());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_archive() {
    let broker = MemoryBroker::new();
    let flaky = Arc::new(Flaky {
        failures: u32::MAX,
        attempts: AtomicU32::new(0),
    });
    let mut mux = ServeMux::new();
    mux.handle("flaky", flaky.clone());

    let (cancel, handle) = start(&broker, mux).await;
    let client = Client::new(Arc::new(broker.clone()));
    client
        .enqueue(Task::new("flaky", vec![]).with_max_retry(2))
        .await
        .unwrap();

    wait_until(|| broker.archived().len() == 1).await;
    // First attempt plus two retries
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    let archived = &broker.archived()[0];
    assert_eq!(archived.task.retried, 2);
    assert_eq!(archived.error, "temporary");

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_skip_retry_archives_immediately() {
    let broker = MemoryBroker::new();
    let mut mux = ServeMux::new();
    mux.handle("skip", Arc::new(Skipper));

    let (cancel, handle) = start(&broker, mux).await;
    Client::new(Arc::new(broker.clone()))
        .enqueue(Task::new("skip", vec![]))
        .await
        .unwrap();

    wait_until(|| broker.archived().len() == 1).await;
    assert_eq!(broker.archived()[0].task.retried, 0);
    assert_eq!(broker.archived()[0].error, "malformed");

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_unknown_task_type_archived() {
    let broker = MemoryBroker::new();
    let (cancel, handle) = start(&broker, ServeMux::new()).await;
    Client::new(Arc::new(broker.clone()))
        .enqueue(Task::new("nobody", vec![]))
        .await
        .unwrap();

    wait_until(|| broker.archived().len() == 1).await;

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_panic_is_retried_then_archived() {
    let broker = MemoryBroker::new();
    let mut mux = ServeMux::new();
    mux.handle("panic", Arc::new(Panicker));

    let (cancel, handle) = start(&broker, mux).await;
    Client::new(Arc::new(broker.clone()))
        .enqueue(Task::new("panic", vec![]).with_max_retry(1))
        .await
        .unwrap();

    wait_until(|| broker.archived().len() == 1).await;
    assert!(broker.archived()[0].error.contains("handler bug"));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let broker = MemoryBroker::new();
    let mut mux = ServeMux::new();
    mux.handle("slow", Arc::new(Sleeper));

    let (cancel, handle) = start(&broker, mux).await;
    Client::new(Arc::new(broker.clone()))
        .enqueue(
            Task::new("slow", vec![])
                .with_max_retry(0)
                .with_timeout(Duration::from_millis(20)),
        )
        .await
        .unwrap();

    wait_until(|| broker.archived().len() == 1).await;
    assert!(broker.archived()[0].error.contains("timed out"));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_polling() {
    let broker = MemoryBroker::new();
    let mut mux = ServeMux::new();
    let flaky = Arc::new(Flaky {
        failures: 0,
        attempts: AtomicU32::new(0),
    });
    mux.handle("flaky", flaky.clone());

    let (cancel, handle) = start(&broker, mux).await;
    cancel.cancel();
    handle.await.unwrap();

    Client::new(Arc::new(broker.clone()))
        .enqueue(Task::new("flaky", vec![]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(broker.pending(), 1);
}
