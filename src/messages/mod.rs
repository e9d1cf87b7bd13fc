//! Per-group ordered message log with realtime fan-out to subscribed members.

pub mod subscription;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MessagingConfig;
use crate::database::models::Message;
use crate::error::CoreError;
use crate::gate::{AuthorizationGate, Predicate};
use crate::groups::MembershipObserver;
use crate::identity::Caller;
use crate::store::{GroupStore, MessageStore, Store, StoreError};

pub use subscription::{Delivery, Subscription};

/// Fan-out channel for one group. `order` serializes append and publish so subscribers
/// observe commit order.
struct GroupLane {
    order: tokio::sync::Mutex<()>,
    sender: broadcast::Sender<Message>,
    /// One handle per subscribed user; dropping it ends every stream that user holds
    subscribers: Mutex<HashMap<Uuid, watch::Sender<()>>>,
}

impl GroupLane {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            order: tokio::sync::Mutex::new(()),
            sender,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Only the lane map still holds it and nobody listens on it
    fn is_idle(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) == 1 && self.sender.receiver_count() == 0
    }

    fn revocation(&self, user_id: Uuid) -> watch::Receiver<()> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, handle| handle.receiver_count() > 0);
        subscribers
            .entry(user_id)
            .or_insert_with(|| watch::channel(()).0)
            .subscribe()
    }
}

pub struct MessageBus {
    store: Arc<dyn Store>,
    gate: AuthorizationGate,
    lanes: Mutex<HashMap<Uuid, Arc<GroupLane>>>,
    capacity: usize,
    max_len: usize,
    history_limit: usize,
}

impl MessageBus {
    pub fn new(store: Arc<dyn Store>, gate: AuthorizationGate, config: &MessagingConfig) -> Self {
        Self {
            store,
            gate,
            lanes: Mutex::new(HashMap::new()),
            capacity: config.channel_capacity.max(1),
            max_len: config.max_message_length,
            history_limit: config.history_limit.max(1),
        }
    }

    fn lane(&self, group_id: Uuid) -> Arc<GroupLane> {
        self.lanes
            .lock()
            .entry(group_id)
            .or_insert_with(|| Arc::new(GroupLane::new(self.capacity)))
            .clone()
    }

    /// Drops the group's lane if nothing holds it any more
    fn release(&self, group_id: Uuid, lane: Arc<GroupLane>) {
        drop(lane);
        let mut lanes = self.lanes.lock();
        if lanes.get(&group_id).map_or(false, GroupLane::is_idle) {
            lanes.remove(&group_id);
        }
    }

    /// Drops lanes nobody listens on and nobody is posting through
    pub fn prune_idle(&self) -> usize {
        let mut lanes = self.lanes.lock();
        let before = lanes.len();
        lanes.retain(|_, lane| !lane.is_idle());
        before - lanes.len()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Ends every live subscription on the group
    pub fn close_group(&self, group_id: Uuid) {
        if self.lanes.lock().remove(&group_id).is_some() {
            debug!(%group_id, "group lane closed");
        }
    }

    /// Ends the user's live subscriptions on the group. Messages already handed to the
    /// stream before this call may still be read.
    pub fn evict(&self, group_id: Uuid, user_id: Uuid) {
        let lane = self.lanes.lock().get(&group_id).cloned();
        let Some(lane) = lane else {
            return;
        };
        if lane.subscribers.lock().remove(&user_id).is_some() {
            debug!(%group_id, %user_id, "subscriber evicted");
        }
    }

    pub async fn post(&self, caller: &Caller, group_id: Uuid, content: &str) -> Result<Message, CoreError> {
        let sender = self.gate.require(caller, &[Predicate::Authenticated]).await?;
        let sender_id = sender.user_id();

        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::validation("Message content is required"));
        }
        if content.chars().count() > self.max_len {
            return Err(CoreError::validation(format!(
                "Message must be at most {} characters",
                self.max_len
            )));
        }

        let lane = self.lane(group_id);
        let appended = {
            let _order = lane.order.lock().await;
            let appended = self.store.append_if_member(group_id, sender_id, content).await;
            if let Ok(message) = &appended {
                // No receivers is fine: the log is the source of truth
                let delivered = lane.sender.send(message.clone()).unwrap_or(0);
                debug!(%group_id, seq = message.seq, delivered, "message published");
            }
            appended
        };

        match appended {
            Ok(message) => Ok(message),
            Err(e) => {
                self.release(group_id, lane);
                if matches!(e, StoreError::NotMember) {
                    warn!(%group_id, %sender_id, "post refused: not a member");
                    return Err(CoreError::forbidden("Not a member of this group"));
                }
                Err(e.into())
            }
        }
    }

    /// Ordered by `seq`; `since` returns only later messages
    pub async fn history(
        &self,
        caller: &Caller,
        group_id: Uuid,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, CoreError> {
        self.gate.require(caller, &[Predicate::MemberOf(group_id)]).await?;
        let limit = limit.unwrap_or(self.history_limit).clamp(1, self.history_limit);
        Ok(self.store.messages_since(group_id, since, limit).await?)
    }

    /// The subscription starts at the latest committed `seq` and lasts until the subscriber
    /// leaves, is removed, or the group is deleted.
    pub async fn subscribe(&self, caller: &Caller, group_id: Uuid) -> Result<Subscription, CoreError> {
        let subscriber = self.gate.require(caller, &[Predicate::MemberOf(group_id)]).await?;
        let subscriber_id = subscriber.user_id();
        self.prune_idle();

        let lane = self.lane(group_id);
        let attached = {
            let _order = lane.order.lock().await;
            let revoked = lane.revocation(subscriber_id);
            let receiver = lane.sender.subscribe();
            // Membership is read again after registering, so a leave that commits from here on
            // reaches this subscription through `evict`
            match self.store.is_member(group_id, subscriber_id).await {
                Ok(true) => match self.store.latest_seq(group_id).await {
                    Ok(cursor) => Ok(Subscription::new(group_id, subscriber_id, cursor, receiver, revoked)),
                    Err(e) => Err(CoreError::from(e)),
                },
                Ok(false) => Err(CoreError::forbidden("Not a member of this group")),
                Err(e) => Err(CoreError::from(e)),
            }
        };

        match attached {
            Ok(subscription) => {
                debug!(%group_id, subscriber = %subscriber_id, cursor = subscription.cursor(), "subscribed");
                Ok(subscription)
            }
            Err(e) => {
                debug!(%group_id, subscriber = %subscriber_id, "membership ended while subscribing");
                self.release(group_id, lane);
                Err(e)
            }
        }
    }
}

impl MembershipObserver for MessageBus {
    fn membership_ended(&self, group_id: Uuid, user_id: Uuid) {
        self.evict(group_id, user_id);
    }

    fn group_deleted(&self, group_id: Uuid) {
        self.close_group(group_id);
    }
}
