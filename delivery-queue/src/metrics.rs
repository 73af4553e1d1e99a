//! Prometheus metrics for the delivery queue

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, HistogramVec,
    IntGauge,
};

lazy_static! {
    /// Total tasks enqueued
    pub static ref QUEUE_ENQUEUE_TOTAL: CounterVec = register_counter_vec!(
        "delivery_queue_enqueue_total",
        "Total tasks enqueued",
        &["queue", "status"]
    )
    .unwrap();

    /// Total tasks processed by outcome
    pub static ref TASK_PROCESS_TOTAL: CounterVec = register_counter_vec!(
        "delivery_queue_process_total",
        "Total tasks processed",
        &["task_type", "outcome"]
    )
    .unwrap();

    /// Task processing duration
    pub static ref TASK_PROCESS_DURATION: HistogramVec = register_histogram_vec!(
        "delivery_queue_process_duration_seconds",
        "Task processing duration in seconds",
        &["task_type"]
    )
    .unwrap();

    /// Total tasks archived
    pub static ref QUEUE_ARCHIVED_TOTAL: CounterVec = register_counter_vec!(
        "delivery_queue_archived_total",
        "Total tasks moved to the archive",
        &["queue", "task_type"]
    )
    .unwrap();

    /// Tasks currently executing
    pub static ref TASKS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "delivery_queue_tasks_in_flight",
        "Tasks currently executing"
    )
    .unwrap();
}
