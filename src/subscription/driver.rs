//! Per-subscription state machine
//!
//! One driver task owns each subscription's transport handle. The task opens
//! the transport, forwards events to the callbacks in channel order, and on a
//! transport error either schedules a reconnect under the same id or moves the
//! subscription to `Failed`. Cancellation is observed at every await point and
//! before every callback invocation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metrics::SubscriptionMetrics;

use super::transport::{SubscriptionTransport, Teardown, TransportEvent};
use super::types::{
    SubscribeOptions, SubscriptionError, SubscriptionId, SubscriptionInfo, SubscriptionKind,
    SubscriptionState,
};

/// Tracked subscription shared between the manager and its driver task
pub(crate) struct SubscriptionEntry {
    pub id: SubscriptionId,
    pub kind: SubscriptionKind,
    pub target: String,
    options: SubscribeOptions,
    state: Mutex<SubscriptionState>,
    retry_count: AtomicU32,
    cancel: CancellationToken,
    teardown: Mutex<Option<Teardown>>,
    /// Held while a callback runs; teardown takes it so no callback outlives `shutdown`
    gate: ReentrantMutex<()>,
}

impl SubscriptionEntry {
    pub fn new(
        id: SubscriptionId,
        kind: SubscriptionKind,
        target: String,
        options: SubscribeOptions,
    ) -> Self {
        Self {
            id,
            kind,
            target,
            options,
            state: Mutex::new(SubscriptionState::Connecting),
            retry_count: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            teardown: Mutex::new(None),
            gate: ReentrantMutex::new(()),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    pub fn info(&self) -> SubscriptionInfo {
        let state = self.state();
        SubscriptionInfo {
            id: self.id.clone(),
            kind: self.kind,
            target: self.target.clone(),
            state,
            retry_count: self.retry_count(),
            is_active: state.is_active() && !self.cancel.is_cancelled(),
        }
    }

    fn set_state(&self, state: SubscriptionState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!(
                subscription_id = %self.id,
                from = ?*current,
                to = ?state,
                "Subscription state changed"
            );
            *current = state;
        }
    }

    /// Stop the driver, release the transport handle and silence all callbacks.
    ///
    /// Once this returns no callback for this id is running or will run.
    pub fn shutdown(&self) {
        {
            let _gate = self.gate.lock();
            self.cancel.cancel();
        }
        self.set_state(SubscriptionState::Closed);
        self.release_teardown();
    }

    /// Keep the handle's teardown, or run it at once if already cancelled
    fn install_teardown(&self, teardown: Teardown) -> bool {
        let mut slot = self.teardown.lock();
        if self.cancel.is_cancelled() {
            drop(slot);
            teardown.run();
            return false;
        }
        *slot = Some(teardown);
        true
    }

    fn release_teardown(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }

    fn emit(&self, f: impl FnOnce(&SubscribeOptions)) {
        let _gate = self.gate.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        f(&self.options);
    }

    fn emit_connected(&self) {
        self.emit(|o| {
            if let Some(cb) = &o.callbacks.on_connected {
                cb(&self.id);
            }
        });
    }

    fn emit_event(&self, data: &Value) {
        self.emit(|o| {
            if let Some(cb) = &o.callbacks.on_event {
                cb(&self.id, data);
            }
        });
    }

    fn emit_error(&self, error: &SubscriptionError) {
        self.emit(|o| {
            if let Some(cb) = &o.callbacks.on_error {
                cb(&self.id, error);
            }
        });
    }

    fn emit_disconnected(&self) {
        self.emit(|o| {
            if let Some(cb) = &o.callbacks.on_disconnected {
                cb(&self.id);
            }
        });
    }
}

enum PumpOutcome {
    Completed,
    Errored(String),
    Cancelled,
}

/// Drive one subscription until it closes, fails or is cancelled
pub(crate) async fn run(entry: Arc<SubscriptionEntry>, transport: Arc<dyn SubscriptionTransport>) {
    let retry = entry.options.retry.clone();

    loop {
        entry.set_state(SubscriptionState::Connecting);

        let opened = tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => return,
            result = transport.open(entry.kind, &entry.target) => result,
        };

        let error = match opened {
            Ok(handle) => {
                let (mut events, teardown) = handle.into_parts();
                if !entry.install_teardown(teardown) {
                    return;
                }

                match pump(&entry, &mut events).await {
                    PumpOutcome::Cancelled => return,
                    PumpOutcome::Completed => {
                        entry.set_state(SubscriptionState::Closed);
                        entry.release_teardown();
                        tracing::info!(subscription_id = %entry.id, "Subscription completed");
                        entry.emit_disconnected();
                        return;
                    }
                    PumpOutcome::Errored(message) => SubscriptionError::Transport(message),
                }
            }
            Err(e) => e,
        };

        entry.release_teardown();
        tracing::warn!(
            subscription_id = %entry.id,
            kind = %entry.kind,
            error = %error,
            retry_count = entry.retry_count(),
            "Subscription error"
        );
        entry.emit_error(&error);

        let attempts = entry.retry_count();
        if retry.auto_reconnect && attempts < retry.max_retries {
            let attempt = entry.retry_count.fetch_add(1, Ordering::AcqRel) + 1;
            entry.set_state(SubscriptionState::RetryWait);
            SubscriptionMetrics::record_retry(entry.kind.as_str());
            tracing::info!(
                subscription_id = %entry.id,
                attempt = attempt,
                max_retries = retry.max_retries,
                delay_ms = retry.retry_delay.as_millis() as u64,
                "Scheduling subscription reconnect"
            );

            tokio::select! {
                biased;
                _ = entry.cancel.cancelled() => return,
                _ = tokio::time::sleep(retry.retry_delay) => {}
            }
            continue;
        }

        entry.set_state(SubscriptionState::Failed);
        SubscriptionMetrics::record_failure(entry.kind.as_str());
        tracing::error!(
            subscription_id = %entry.id,
            kind = %entry.kind,
            attempts = attempts,
            "Subscription failed permanently"
        );
        entry.emit_error(&SubscriptionError::RetryExhausted { attempts });
        return;
    }
}

async fn pump(
    entry: &SubscriptionEntry,
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
) -> PumpOutcome {
    loop {
        let event = tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => return PumpOutcome::Cancelled,
            event = events.recv() => event,
        };

        match event {
            Some(TransportEvent::Open) => {
                entry.set_state(SubscriptionState::Connected);
                tracing::info!(subscription_id = %entry.id, target = %entry.target, "Subscription connected");
                entry.emit_connected();
            }
            Some(TransportEvent::Data(data)) => entry.emit_event(&data),
            Some(TransportEvent::Error(message)) => return PumpOutcome::Errored(message),
            Some(TransportEvent::Complete) | None => return PumpOutcome::Completed,
        }
    }
}
