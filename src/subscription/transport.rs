//! Client-side push transport consumed by the multiplexer

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::types::{SubscriptionError, SubscriptionKind};

/// Signals delivered by an open transport subscription, in channel order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server acknowledged the subscription
    Open,
    Data(Value),
    /// Transient failure; the subscription is dead after this
    Error(String),
    /// Server-initiated graceful close
    Complete,
}

/// Releases the live transport subscription. Runs at most once.
pub struct Teardown(Option<Box<dyn FnOnce() + Send>>);

impl Teardown {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Self(None)
    }

    pub fn run(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Teardown").field(&self.0.is_some()).finish()
    }
}

/// An opened transport subscription: its event stream plus ownership of the teardown
#[derive(Debug)]
pub struct TransportHandle {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    teardown: Teardown,
}

impl TransportHandle {
    pub fn new(events: mpsc::UnboundedReceiver<TransportEvent>, teardown: Teardown) -> Self {
        Self { events, teardown }
    }

    /// A handle fed through the returned sink
    pub fn channel(teardown: Teardown) -> (TransportSink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TransportSink { tx }, Self::new(rx, teardown))
    }

    pub(crate) fn into_parts(self) -> (mpsc::UnboundedReceiver<TransportEvent>, Teardown) {
        (self.events, self.teardown)
    }
}

/// Producer side of a transport subscription: the `next`/`error`/`complete` slots.
///
/// Every method returns `false` once the subscriber has gone away.
#[derive(Debug, Clone)]
pub struct TransportSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportSink {
    pub fn open(&self) -> bool {
        self.tx.send(TransportEvent::Open).is_ok()
    }

    pub fn next(&self, data: Value) -> bool {
        self.tx.send(TransportEvent::Data(data)).is_ok()
    }

    pub fn error(&self, error: impl Into<String>) -> bool {
        self.tx.send(TransportEvent::Error(error.into())).is_ok()
    }

    pub fn complete(&self) -> bool {
        self.tx.send(TransportEvent::Complete).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Opens transport subscriptions scoped to a target (user id or session id)
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    /// Open a subscription. An `Err` is treated like a transient transport error.
    async fn open(
        &self,
        kind: SubscriptionKind,
        target: &str,
    ) -> Result<TransportHandle, SubscriptionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_teardown_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let teardown = Teardown::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        teardown.run();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_handle_releases_subscription() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (sink, handle) = TransportHandle::channel(Teardown::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        drop(handle);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!sink.next(serde_json::json!({})));
    }
}
