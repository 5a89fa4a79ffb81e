//! Escalation for swallowed `touch` failures
//!
//! Touch failures never reach the transport, so a store that is broken for
//! every message would otherwise stay invisible. The monitor counts
//! consecutive failures and raises one alert per failure streak once the
//! threshold is crossed.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::metrics::RegistryMetrics;

use super::types::RegistryError;

pub struct TouchFailureMonitor {
    threshold: u32,
    consecutive: AtomicU32,
    alerted: AtomicBool,
}

impl TouchFailureMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: AtomicU32::new(0),
            alerted: AtomicBool::new(false),
        }
    }

    /// Reset the failure streak
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
        if self.alerted.swap(false, Ordering::Relaxed) {
            tracing::info!("Connection registry touch recovered");
        }
    }

    /// Record a failure; returns `true` when this failure raised the alert
    pub fn record_failure(&self, connection_id: &str, error: &RegistryError) -> bool {
        RegistryMetrics::record_touch_failure();

        // A late message for an already-closed connection is expected noise
        if matches!(error, RegistryError::NotFound(_) | RegistryError::Closed(_)) {
            tracing::debug!(
                connection_id = %connection_id,
                error = %error,
                "Touch skipped for closed connection"
            );
            return false;
        }

        let streak = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            connection_id = %connection_id,
            error = %error,
            consecutive_failures = streak,
            "Failed to update connection activity"
        );

        if streak >= self.threshold && !self.alerted.swap(true, Ordering::Relaxed) {
            RegistryMetrics::record_touch_escalation();
            tracing::error!(
                consecutive_failures = streak,
                threshold = self.threshold,
                "Connection registry touch failing repeatedly; store may be unavailable"
            );
            return true;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }
}
