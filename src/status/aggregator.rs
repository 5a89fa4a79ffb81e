use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::subscription::{
    SubscribeOptions, SubscriptionCallbacks, SubscriptionError, SubscriptionId, SubscriptionKind,
    SubscriptionManager,
};

/// Shown when a member has exhausted its retry budget
pub const CONNECTION_LOST_MESSAGE: &str = "connection lost, please retry manually";

/// Combined connectivity of a group of subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStatus {
    pub is_connected: bool,
    pub error: Option<String>,
}

/// One subscription opened as part of an aggregate
#[derive(Debug, Clone)]
pub struct AggregateMember {
    pub kind: SubscriptionKind,
    pub target: String,
    pub options: SubscribeOptions,
}

impl AggregateMember {
    pub fn new(kind: SubscriptionKind, target: impl Into<String>, options: SubscribeOptions) -> Self {
        Self {
            kind,
            target: target.into(),
            options,
        }
    }
}

/// Recomputes the aggregate from every member's latest flag
struct StatusReducer {
    flags: Mutex<Vec<bool>>,
    status: watch::Sender<AggregatedStatus>,
}

impl StatusReducer {
    fn new(members: usize) -> Self {
        let (status, _) = watch::channel(AggregatedStatus::default());
        Self {
            flags: Mutex::new(vec![false; members]),
            status,
        }
    }

    fn publish(&self, member: usize, connected: bool, terminal: bool) {
        let mut flags = self.flags.lock();
        if let Some(flag) = flags.get_mut(member) {
            *flag = connected;
        }
        let is_connected = !flags.is_empty() && flags.iter().all(|f| *f);

        self.status.send_if_modified(|status| {
            let mut changed = status.is_connected != is_connected;
            status.is_connected = is_connected;
            if terminal && status.error.is_none() {
                status.error = Some(CONNECTION_LOST_MESSAGE.to_string());
                changed = true;
            }
            changed
        });
    }

    fn clear_error(&self) {
        let _flags = self.flags.lock();
        self.status.send_if_modified(|status| status.error.take().is_some());
    }
}

struct MemberSlot {
    member: AggregateMember,
    id: Option<SubscriptionId>,
}

/// AND over the connected flags of N subscriptions opened together.
///
/// The aggregate starts disconnected and becomes connected only once every
/// member has reported `on_connected`. Any member error or disconnect flips it
/// back immediately.
pub struct ConnectionStatusAggregator {
    manager: Arc<SubscriptionManager>,
    reducer: Arc<StatusReducer>,
    members: Mutex<Vec<MemberSlot>>,
}

impl ConnectionStatusAggregator {
    pub fn open(
        manager: Arc<SubscriptionManager>,
        members: Vec<AggregateMember>,
    ) -> Result<Self, SubscriptionError> {
        let reducer = Arc::new(StatusReducer::new(members.len()));
        let mut slots = Vec::with_capacity(members.len());

        for (index, member) in members.into_iter().enumerate() {
            match subscribe_member(&manager, &reducer, index, &member) {
                Ok(id) => slots.push(MemberSlot { member, id: Some(id) }),
                Err(e) => {
                    for id in slots.iter().filter_map(|s| s.id.as_deref()) {
                        let _ = manager.unsubscribe(id);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            manager,
            reducer,
            members: Mutex::new(slots),
        })
    }

    /// Events, UI control and notes for one user
    pub fn for_user(
        manager: Arc<SubscriptionManager>,
        user_id: &str,
        options: SubscribeOptions,
    ) -> Result<Self, SubscriptionError> {
        let members = [
            SubscriptionKind::Events,
            SubscriptionKind::UiControl,
            SubscriptionKind::Notes,
        ]
        .into_iter()
        .map(|kind| AggregateMember::new(kind, user_id, options.clone()))
        .collect();
        Self::open(manager, members)
    }

    pub fn is_connected(&self) -> bool {
        self.reducer.status.borrow().is_connected
    }

    pub fn status(&self) -> AggregatedStatus {
        self.reducer.status.borrow().clone()
    }

    /// Receiver notified on every aggregate change
    pub fn watch(&self) -> watch::Receiver<AggregatedStatus> {
        self.reducer.status.subscribe()
    }

    pub fn member_ids(&self) -> Vec<SubscriptionId> {
        self.members
            .lock()
            .iter()
            .filter_map(|slot| slot.id.clone())
            .collect()
    }

    /// Re-subscribe every member whose subscription is torn down or failed.
    ///
    /// Returns the number of members re-subscribed.
    pub fn reconnect_all(&self) -> Result<usize, SubscriptionError> {
        self.reducer.clear_error();

        let mut members = self.members.lock();
        let mut reconnected = 0;
        for (index, slot) in members.iter_mut().enumerate() {
            let live = slot
                .id
                .as_deref()
                .and_then(|id| self.manager.subscription(id))
                .is_some_and(|info| info.is_active);
            if live {
                continue;
            }

            if let Some(old) = slot.id.take() {
                self.manager.unsubscribe(&old)?;
            }
            self.reducer.publish(index, false, false);
            slot.id = Some(subscribe_member(&self.manager, &self.reducer, index, &slot.member)?);
            reconnected += 1;
        }

        if reconnected > 0 {
            tracing::info!(reconnected = reconnected, "Aggregate members re-subscribed");
        }
        Ok(reconnected)
    }

    /// Unsubscribe every member
    pub fn disconnect_all(&self) -> Result<(), SubscriptionError> {
        let mut members = self.members.lock();
        for (index, slot) in members.iter_mut().enumerate() {
            if let Some(id) = slot.id.take() {
                self.manager.unsubscribe(&id)?;
            }
            self.reducer.publish(index, false, false);
        }
        Ok(())
    }
}

/// Subscribe one member with callbacks that feed the reducer before the caller's own
fn subscribe_member(
    manager: &SubscriptionManager,
    reducer: &Arc<StatusReducer>,
    index: usize,
    member: &AggregateMember,
) -> Result<SubscriptionId, SubscriptionError> {
    let user = member.options.callbacks.clone();
    let mut callbacks = SubscriptionCallbacks {
        on_event: user.on_event.clone(),
        ..Default::default()
    };

    let r = reducer.clone();
    let inner = user.on_connected.clone();
    callbacks = callbacks.on_connected(move |id| {
        r.publish(index, true, false);
        if let Some(cb) = &inner {
            cb(id);
        }
    });

    let r = reducer.clone();
    let inner = user.on_disconnected.clone();
    callbacks = callbacks.on_disconnected(move |id| {
        r.publish(index, false, false);
        if let Some(cb) = &inner {
            cb(id);
        }
    });

    let r = reducer.clone();
    let inner = user.on_error;
    callbacks = callbacks.on_error(move |id, error| {
        r.publish(index, false, error.is_terminal());
        if let Some(cb) = &inner {
            cb(id, error);
        }
    });

    let options = SubscribeOptions {
        callbacks,
        retry: member.options.retry.clone(),
    };
    manager.subscribe(member.kind, member.target.clone(), options)
}
