//! Subscription kinds, options and callback slots

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

/// Opaque subscription id, stable across reconnects
pub type SubscriptionId = String;

/// Logical topic family a subscription listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionKind {
    Events,
    Chat,
    VoiceSession,
    UiControl,
    Notes,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Chat => "chat",
            Self::VoiceSession => "voice_session",
            Self::UiControl => "ui_control",
            Self::Notes => "notes",
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Events => "events_",
            Self::Chat => "chat_",
            Self::VoiceSession => "voice_session_",
            Self::UiControl => "ui_control_",
            Self::Notes => "notes_",
        }
    }

    /// `{prefix}{unix_millis}_{9 random alphanumerics}`
    pub(crate) fn generate_id(&self) -> SubscriptionId {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(char::from)
            .collect();
        format!(
            "{}{}_{}",
            self.id_prefix(),
            chrono::Utc::now().timestamp_millis(),
            suffix.to_lowercase()
        )
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a subscription.
///
/// `Connecting -> Connected -> (RetryWait -> Connecting)* -> Failed | Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Connecting,
    Connected,
    RetryWait,
    /// Retry budget exhausted; never retried again
    Failed,
    /// Completed by the server or torn down
    Closed,
}

impl SubscriptionState {
    /// Whether the underlying transport subscription is (or will be) live
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::RetryWait)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Subscription manager is not initialized")]
    NotReady,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Retry budget exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    #[error("Failed to open transport subscription: {0}")]
    TransportOpen(String),
}

impl SubscriptionError {
    /// Terminal errors are surfaced once and never retried
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}

/// Automatic reconnect policy for one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub auto_reconnect: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            auto_reconnect: false,
            ..Default::default()
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&SubscriptionId, &Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SubscriptionId, &SubscriptionError) + Send + Sync>;
pub type LifecycleCallback = Arc<dyn Fn(&SubscriptionId) + Send + Sync>;

/// Optional callback slots. Invocations for one id are strictly ordered.
#[derive(Clone, Default)]
pub struct SubscriptionCallbacks {
    pub on_event: Option<EventCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_connected: Option<LifecycleCallback>,
    pub on_disconnected: Option<LifecycleCallback>,
}

impl SubscriptionCallbacks {
    pub fn on_event(mut self, f: impl Fn(&SubscriptionId, &Value) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&SubscriptionId, &SubscriptionError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_connected(mut self, f: impl Fn(&SubscriptionId) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    pub fn on_disconnected(mut self, f: impl Fn(&SubscriptionId) + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SubscriptionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionCallbacks")
            .field("on_event", &self.on_event.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .finish()
    }
}

/// Options accepted by `subscribe`
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub callbacks: SubscriptionCallbacks,
    pub retry: RetryPolicy,
}

impl SubscribeOptions {
    pub fn new(callbacks: SubscriptionCallbacks) -> Self {
        Self {
            callbacks,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Point-in-time view of a tracked subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub kind: SubscriptionKind,
    pub target: String,
    pub state: SubscriptionState,
    pub retry_count: u32,
    pub is_active: bool,
}
