//! Subscription multiplexer
//!
//! Client-side tracking of logical subscriptions over a push transport.
//! Each subscription runs as an explicit state machine
//! (`Connecting`, `Connected`, `RetryWait`, `Failed`, `Closed`) with its own
//! retry budget and a cancellation token checked before every callback.

mod driver;
mod manager;
mod transport;
mod types;

pub use manager::SubscriptionManager;
pub use transport::{SubscriptionTransport, Teardown, TransportEvent, TransportHandle, TransportSink};
pub use types::{
    ErrorCallback, EventCallback, LifecycleCallback, RetryPolicy, SubscribeOptions,
    SubscriptionCallbacks, SubscriptionError, SubscriptionId, SubscriptionInfo, SubscriptionKind,
    SubscriptionState,
};
