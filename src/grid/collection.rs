use std::sync::{Arc, Mutex};

use super::event::{CacheEvent, CacheListener, EventKind, ListenerTable, SubscriptionId};
use super::locked;
use super::object::{DistributedObject, SupportsItemListener};
use crate::admin::ObjectKind;

/// Backing store for sets, plain collections and queues.  The kind decides
/// whether duplicates are accepted; item order is insertion order for all.
pub struct DistributedCollection {
    name: String,
    kind: ObjectKind,
    items: Mutex<Vec<String>>,
    listeners: ListenerTable,
}

impl DistributedCollection {
    pub(crate) fn new(name: &str, kind: ObjectKind) -> DistributedCollection {
        DistributedCollection {
            name: name.to_string(),
            kind,
            items: Mutex::new(Vec::new()),
            listeners: ListenerTable::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// false when a set already holds the item
    pub async fn add(&self, item: &str) -> bool {
        {
            let mut items = locked(&self.items);
            if self.kind == ObjectKind::Set && items.iter().any(|v| v == item) {
                return false;
            }
            items.push(item.to_string());
        }

        self.listeners
            .fire(CacheEvent::item(&self.name, EventKind::Put, item));
        true
    }

    /// removes the first matching item
    pub async fn remove(&self, item: &str) -> bool {
        let removed = {
            let mut items = locked(&self.items);
            match items.iter().position(|v| v == item) {
                Some(idx) => {
                    items.remove(idx);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.listeners
                .fire(CacheEvent::item(&self.name, EventKind::Remove, item));
        }

        removed
    }

    pub async fn offer(&self, item: &str) -> bool {
        self.add(item).await
    }

    /// take the head item
    pub async fn poll(&self) -> Option<String> {
        let head = {
            let mut items = locked(&self.items);
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };

        if let Some(v) = &head {
            self.listeners
                .fire(CacheEvent::item(&self.name, EventKind::Remove, v));
        }

        head
    }

    pub async fn contains(&self, item: &str) -> bool {
        locked(&self.items).iter().any(|v| v == item)
    }

    pub async fn items(&self) -> Vec<String> {
        locked(&self.items).clone()
    }

    pub async fn len(&self) -> usize {
        locked(&self.items).len()
    }

    pub async fn is_empty(&self) -> bool {
        locked(&self.items).is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl SupportsItemListener for DistributedCollection {
    fn add_item_listener(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId {
        self.listeners.add(owner, callback)
    }

    fn remove_item_listener(&self, owner: &str, subscription: &SubscriptionId) -> bool {
        self.listeners.remove(owner, subscription)
    }
}

impl DistributedObject for DistributedCollection {
    fn object_id(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn subscribe(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId {
        self.add_item_listener(owner, callback)
    }

    fn unsubscribe(&self, owner: &str, subscription: &SubscriptionId) -> bool {
        self.remove_item_listener(owner, subscription)
    }

    fn release_owner(&self, owner: &str) -> usize {
        self.listeners.drop_owner(owner)
    }
}
