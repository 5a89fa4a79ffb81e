use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;

use super::driver::{self, SubscriptionEntry};
use super::transport::SubscriptionTransport;
use super::types::{
    SubscribeOptions, SubscriptionError, SubscriptionId, SubscriptionInfo, SubscriptionKind,
};

/// Transport plus the runtime driver tasks are spawned on
#[derive(Clone)]
struct Backend {
    transport: Arc<dyn SubscriptionTransport>,
    runtime: Option<Handle>,
}

/// Client-side registry of logical subscriptions.
///
/// Each subscription is served by its own driver task with an independent
/// retry budget. `subscribe` and `unsubscribe` never block on the transport
/// and may be called from any thread: driver tasks run on the runtime
/// captured at [`initialize`](Self::initialize).
pub struct SubscriptionManager {
    backend: RwLock<Option<Backend>>,
    subscriptions: DashMap<SubscriptionId, Arc<SubscriptionEntry>>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    /// Create a manager that rejects calls until [`initialize`](Self::initialize)
    pub fn new() -> Self {
        Self {
            backend: RwLock::new(None),
            subscriptions: DashMap::new(),
        }
    }

    pub fn with_transport(transport: Arc<dyn SubscriptionTransport>) -> Self {
        let manager = Self::new();
        manager.initialize(transport);
        manager
    }

    /// Attach the transport; subscriptions opened afterwards use it.
    ///
    /// Driver tasks are spawned on the runtime this is called from. Outside a
    /// runtime, each `subscribe` call must itself run inside one.
    pub fn initialize(&self, transport: Arc<dyn SubscriptionTransport>) {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::warn!("Subscription manager initialized outside a Tokio runtime");
        }
        self.attach(Backend { transport, runtime });
    }

    /// Attach the transport and spawn driver tasks on `runtime`
    pub fn initialize_on(&self, transport: Arc<dyn SubscriptionTransport>, runtime: Handle) {
        self.attach(Backend {
            transport,
            runtime: Some(runtime),
        });
    }

    fn attach(&self, backend: Backend) {
        *self.backend.write() = Some(backend);
        tracing::info!("Subscription manager initialized");
    }

    pub fn is_ready(&self) -> bool {
        self.backend.read().is_some()
    }

    fn backend(&self) -> Result<Backend, SubscriptionError> {
        self.backend.read().clone().ok_or(SubscriptionError::NotReady)
    }

    /// Open a subscription and return its id.
    ///
    /// Subscribing twice to the same `(kind, target)` yields two independent
    /// subscriptions.
    pub fn subscribe(
        &self,
        kind: SubscriptionKind,
        target: impl Into<String>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, SubscriptionError> {
        let Backend { transport, runtime } = self.backend()?;
        let Some(runtime) = runtime.or_else(|| Handle::try_current().ok()) else {
            tracing::warn!(kind = %kind, "Subscribe called with no Tokio runtime available");
            return Err(SubscriptionError::NotReady);
        };
        let target = target.into();

        let id = loop {
            let id = kind.generate_id();
            if !self.subscriptions.contains_key(&id) {
                break id;
            }
        };
        let entry = Arc::new(SubscriptionEntry::new(id.clone(), kind, target, options));
        self.subscriptions.insert(id.clone(), entry.clone());

        tracing::info!(
            subscription_id = %entry.id,
            kind = %kind,
            target = %entry.target,
            "Subscription created"
        );

        runtime.spawn(driver::run(entry, transport));
        Ok(id)
    }

    /// Tear down a subscription. Returns `false` if the id is unknown.
    ///
    /// A pending reconnect is cancelled and no callback fires for this id
    /// once the call returns.
    pub fn unsubscribe(&self, id: &str) -> Result<bool, SubscriptionError> {
        self.backend()?;

        match self.subscriptions.remove(id) {
            Some((_, entry)) => {
                entry.shutdown();
                tracing::info!(subscription_id = %id, "Unsubscribed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tear down every tracked subscription; returns how many were removed
    pub fn unsubscribe_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in ids {
            if let Some((_, entry)) = self.subscriptions.remove(&id) {
                entry.shutdown();
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(count = removed, "All subscriptions torn down");
        }
        removed
    }

    /// Snapshot of every tracked subscription, including failed ones
    pub fn get_active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> =
            self.subscriptions.iter().map(|entry| entry.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn subscription(&self, id: &str) -> Option<SubscriptionInfo> {
        self.subscriptions.get(id).map(|entry| entry.info())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn subscribe_to_events(
        &self,
        user_id: &str,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, SubscriptionError> {
        self.subscribe(SubscriptionKind::Events, user_id, options)
    }

    pub fn subscribe_to_chat(
        &self,
        session_id: &str,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, SubscriptionError> {
        self.subscribe(SubscriptionKind::Chat, session_id, options)
    }

    pub fn subscribe_to_voice_session(
        &self,
        session_id: &str,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, SubscriptionError> {
        self.subscribe(SubscriptionKind::VoiceSession, session_id, options)
    }

    pub fn subscribe_to_ui_control(
        &self,
        user_id: &str,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, SubscriptionError> {
        self.subscribe(SubscriptionKind::UiControl, user_id, options)
    }

    pub fn subscribe_to_notes(
        &self,
        user_id: &str,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, SubscriptionError> {
        self.subscribe(SubscriptionKind::Notes, user_id, options)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}
