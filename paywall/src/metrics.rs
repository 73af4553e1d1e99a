//! Prometheus metrics for the payment pipeline

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

lazy_static! {
    /// Chain events seen by listeners, by classification
    pub static ref EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "paywall_events_total",
        "Chain events processed by listeners",
        &["network", "classification"]
    )
    .unwrap();

    /// Transfers recorded in the ledger
    pub static ref TRANSACTIONS_RECORDED_TOTAL: CounterVec = register_counter_vec!(
        "paywall_transactions_recorded_total",
        "Transfers written to the ledger",
        &["network", "result"]
    )
    .unwrap();

    /// Invoices that reached paid and were notified
    pub static ref INVOICES_PAID_TOTAL: IntCounter = register_int_counter!(
        "paywall_invoices_paid_total",
        "Invoices notified as paid"
    )
    .unwrap();

    /// Reconciliation outcomes
    pub static ref RECONCILE_TOTAL: CounterVec = register_counter_vec!(
        "paywall_reconcile_total",
        "Invoice reconciliation outcomes",
        &["outcome"]
    )
    .unwrap();

    /// Listener restarts by the supervisor
    pub static ref LISTENER_RESTARTS_TOTAL: CounterVec = register_counter_vec!(
        "paywall_listener_restarts_total",
        "Chain listener restarts",
        &["network"]
    )
    .unwrap();
}
