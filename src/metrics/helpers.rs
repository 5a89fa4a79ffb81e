//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, CONNECTIONS_OPENED, CONNECTIONS_RECLAIMED,
    CONNECTION_DURATION, DISPATCH_ERRORS, MESSAGES_RECEIVED, MESSAGES_REJECTED, RECLAIM_FAILURES,
    RECORDS_PURGED, REGISTRY_RECORDS, SUBSCRIPTION_FAILURES, SUBSCRIPTION_RETRIES, SWEEPS_TOTAL, SWEEP_DURATION_MS,
    TOUCH_ESCALATIONS, TOUCH_FAILURES,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
        CONNECTION_DURATION.observe(duration_secs);
    }
}

pub struct MessageMetrics;

impl MessageMetrics {
    pub fn record_received(message_type: &str) {
        MESSAGES_RECEIVED.with_label_values(&[message_type]).inc();
    }

    pub fn record_unknown_type() {
        MESSAGES_REJECTED.with_label_values(&["unknown_type"]).inc();
    }

    pub fn record_invalid() {
        MESSAGES_REJECTED.with_label_values(&["invalid"]).inc();
    }

    pub fn record_dispatch_error() {
        DISPATCH_ERRORS.inc();
    }
}

pub struct RegistryMetrics;

impl RegistryMetrics {
    pub fn record_touch_failure() {
        TOUCH_FAILURES.inc();
    }

    pub fn record_touch_escalation() {
        TOUCH_ESCALATIONS.inc();
    }

    pub fn set_record_counts(connected: usize, disconnected: usize) {
        REGISTRY_RECORDS
            .with_label_values(&["connected"])
            .set(connected as i64);
        REGISTRY_RECORDS
            .with_label_values(&["disconnected"])
            .set(disconnected as i64);
    }
}

pub struct ReclaimerMetrics;

impl ReclaimerMetrics {
    pub fn record_sweep(reclaimed: u64, failed: u64, purged: u64, duration_ms: u64) {
        SWEEPS_TOTAL.inc();
        CONNECTIONS_RECLAIMED.inc_by(reclaimed);
        RECLAIM_FAILURES.inc_by(failed);
        RECORDS_PURGED.inc_by(purged);
        SWEEP_DURATION_MS.observe(duration_ms as f64);
    }
}

pub struct SubscriptionMetrics;

impl SubscriptionMetrics {
    pub fn record_retry(kind: &str) {
        SUBSCRIPTION_RETRIES.with_label_values(&[kind]).inc();
    }

    pub fn record_failure(kind: &str) {
        SUBSCRIPTION_FAILURES.with_label_values(&[kind]).inc();
    }
}
