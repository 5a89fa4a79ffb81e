//! Prometheus metrics for the realtime service.
//!
//! - Connection lifecycle (opened, closed)
//! - Inbound messages by type, rejections, dispatch failures
//! - Registry touch failures and escalations
//! - Reclaimer sweeps
//! - Client-side subscription retries and terminal failures

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, MessageMetrics, ReclaimerMetrics, RegistryMetrics,
    SubscriptionMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_realtime";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total transport connections opened"
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total transport connections closed"
    ).unwrap();

    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Transport connections currently open on this instance"
    ).unwrap();

    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Transport connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    pub static ref MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Inbound messages dispatched by type",
        &["type"]
    ).unwrap();

    pub static ref MESSAGES_REJECTED: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_rejected_total", METRIC_PREFIX),
        "Inbound messages rejected before dispatch",
        &["reason"]
    ).unwrap();

    pub static ref DISPATCH_ERRORS: IntCounter = register_int_counter!(
        format!("{}_dispatch_errors_total", METRIC_PREFIX),
        "Handler failures converted to server errors"
    ).unwrap();

    // ============================================================================
    // Registry Metrics
    // ============================================================================

    pub static ref TOUCH_FAILURES: IntCounter = register_int_counter!(
        format!("{}_registry_touch_failures_total", METRIC_PREFIX),
        "Swallowed last-activity update failures"
    ).unwrap();

    pub static ref REGISTRY_RECORDS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_registry_records", METRIC_PREFIX),
        "Connection records in the registry by status",
        &["status"]
    ).unwrap();

    pub static ref TOUCH_ESCALATIONS: IntCounter = register_int_counter!(
        format!("{}_registry_touch_escalations_total", METRIC_PREFIX),
        "Times consecutive touch failures crossed the alert threshold"
    ).unwrap();

    // ============================================================================
    // Reclaimer Metrics
    // ============================================================================

    pub static ref SWEEPS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reclaimer_sweeps_total", METRIC_PREFIX),
        "Stale-connection sweeps run"
    ).unwrap();

    pub static ref CONNECTIONS_RECLAIMED: IntCounter = register_int_counter!(
        format!("{}_reclaimer_reclaimed_total", METRIC_PREFIX),
        "Connections flipped to DISCONNECTED by the reclaimer"
    ).unwrap();

    pub static ref RECLAIM_FAILURES: IntCounter = register_int_counter!(
        format!("{}_reclaimer_failures_total", METRIC_PREFIX),
        "Reclaimer status updates that failed"
    ).unwrap();

    pub static ref RECORDS_PURGED: IntCounter = register_int_counter!(
        format!("{}_reclaimer_purged_total", METRIC_PREFIX),
        "DISCONNECTED records removed after the retention window"
    ).unwrap();

    pub static ref SWEEP_DURATION_MS: Histogram = register_histogram!(
        format!("{}_reclaimer_sweep_duration_ms", METRIC_PREFIX),
        "Sweep duration in milliseconds",
        vec![1.0, 5.0, 25.0, 100.0, 500.0, 2500.0, 10000.0]
    ).unwrap();

    // ============================================================================
    // Subscription Metrics
    // ============================================================================

    pub static ref SUBSCRIPTION_RETRIES: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscription_retries_total", METRIC_PREFIX),
        "Subscription reconnect attempts by kind",
        &["kind"]
    ).unwrap();

    pub static ref SUBSCRIPTION_FAILURES: IntCounterVec = register_int_counter_vec!(
        format!("{}_subscription_failures_total", METRIC_PREFIX),
        "Subscriptions that exhausted their retry budget by kind",
        &["kind"]
    ).unwrap();
}
