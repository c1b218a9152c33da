use async_channel::{unbounded, Receiver, Sender};
use log::*;
use std::sync::{Arc, Mutex};

use super::event::{CacheEvent, CacheListener, SubscriptionId};
use super::locked;
use super::object::{DistributedObject, SupportsMessageListener};
use crate::admin::ObjectKind;

struct TopicSubscriber {
    owner: String,
    id: SubscriptionId,
    tx: Sender<String>,
}

/// Broadcast channel.  Each subscriber gets its own unbounded fifo, so a
/// subscriber sees every message exactly once, in publish order, one at a time.
pub struct DistributedTopic {
    name: String,
    subscribers: Mutex<Vec<TopicSubscriber>>,
}

impl DistributedTopic {
    pub(crate) fn new(name: &str) -> DistributedTopic {
        DistributedTopic {
            name: name.to_string(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// deliver to all current subscribers; returns the delivery count
    pub async fn publish(&self, message: &str) -> usize {
        // holding the lock across the fan-out keeps every subscriber queue in the same order
        let mut subscribers = locked(&self.subscribers);
        subscribers.retain(|s| s.tx.try_send(message.to_string()).is_ok());
        debug!("topic {} delivered to {} subscriber(s)", self.name, subscribers.len());

        subscribers.len()
    }

    pub fn subscribe(&self, owner: &str) -> (SubscriptionId, Receiver<String>) {
        let (tx, rx) = unbounded();
        let id = SubscriptionId::create();
        locked(&self.subscribers).push(TopicSubscriber {
            owner: owner.to_string(),
            id: id.clone(),
            tx,
        });

        (id, rx)
    }

    /// dropping the sender closes the subscriber's receiver
    pub fn unsubscribe(&self, owner: &str, id: &SubscriptionId) -> bool {
        let mut subscribers = locked(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| !(s.owner == owner && &s.id == id));
        subscribers.len() < before
    }

    pub fn subscriber_count(&self) -> usize {
        locked(&self.subscribers).len()
    }
}

impl SupportsMessageListener for DistributedTopic {
    fn add_message_listener(
        &self,
        owner: &str,
        callback: Arc<dyn CacheListener>,
    ) -> SubscriptionId {
        let (id, rx) = self.subscribe(owner);
        let name = self.name.clone();
        async_std::task::spawn(async move {
            while let Ok(body) = rx.recv().await {
                callback.on_event(&CacheEvent::message(&name, body));
            }
        });

        id
    }

    fn remove_message_listener(&self, owner: &str, subscription: &SubscriptionId) -> bool {
        self.unsubscribe(owner, subscription)
    }
}

impl DistributedObject for DistributedTopic {
    fn object_id(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Topic
    }

    fn subscribe(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId {
        self.add_message_listener(owner, callback)
    }

    fn unsubscribe(&self, owner: &str, subscription: &SubscriptionId) -> bool {
        self.remove_message_listener(owner, subscription)
    }

    fn release_owner(&self, owner: &str) -> usize {
        let mut subscribers = locked(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.owner != owner);
        before - subscribers.len()
    }
}
