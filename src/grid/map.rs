use hashbrown::HashMap;
use std::sync::{Arc, Mutex};

use super::event::{CacheEvent, CacheListener, EventKind, ListenerTable, SubscriptionId};
use super::locked;
use super::object::{DistributedObject, SupportsEntryListener};
use crate::admin::ObjectKind;

/// a cluster-wide string map
pub struct DistributedMap {
    name: String,
    entries: Mutex<HashMap<String, String>>,
    listeners: ListenerTable,
}

impl DistributedMap {
    pub(crate) fn new(name: &str) -> DistributedMap {
        DistributedMap {
            name: name.to_string(),
            entries: Mutex::new(HashMap::new()),
            listeners: ListenerTable::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// returns the previous value, if any
    pub async fn put(&self, key: &str, value: &str) -> Option<String> {
        let previous = locked(&self.entries).insert(key.to_string(), value.to_string());
        let kind = if previous.is_some() {
            EventKind::Update
        } else {
            EventKind::Put
        };

        self.listeners.fire(CacheEvent::entry(
            &self.name,
            kind,
            key,
            Some(value.to_string()),
        ));

        previous
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        locked(&self.entries).get(key).cloned()
    }

    pub async fn remove(&self, key: &str) -> Option<String> {
        let removed = locked(&self.entries).remove(key);
        if let Some(v) = &removed {
            self.listeners.fire(CacheEvent::entry(
                &self.name,
                EventKind::Remove,
                key,
                Some(v.clone()),
            ));
        }

        removed
    }

    /// Compare-and-set on a single entry.  `expected == None` means the key
    /// must be absent; `new == None` deletes the entry.  Returns false, with
    /// nothing changed, when the current value differs from `expected`.
    pub async fn replace(&self, key: &str, expected: Option<&str>, new: Option<String>) -> bool {
        let event = {
            let mut entries = locked(&self.entries);
            if entries.get(key).map(|v| v.as_str()) != expected {
                return false;
            }

            match new {
                Some(v) => {
                    let kind = if expected.is_some() {
                        EventKind::Update
                    } else {
                        EventKind::Put
                    };
                    entries.insert(key.to_string(), v.clone());
                    Some(CacheEvent::entry(&self.name, kind, key, Some(v)))
                }
                None => entries
                    .remove(key)
                    .map(|old| CacheEvent::entry(&self.name, EventKind::Remove, key, Some(old))),
            }
        };

        if let Some(event) = event {
            self.listeners.fire(event);
        }

        true
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = locked(&self.entries).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        locked(&self.entries).len()
    }

    pub async fn is_empty(&self) -> bool {
        locked(&self.entries).is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // change an entry from synchronous test code, without firing events
    #[cfg(test)]
    pub(crate) fn overwrite(&self, key: &str, value: &str) {
        locked(&self.entries).insert(key.to_string(), value.to_string());
    }
}

impl SupportsEntryListener for DistributedMap {
    fn add_entry_listener(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId {
        self.listeners.add(owner, callback)
    }

    fn remove_entry_listener(&self, owner: &str, subscription: &SubscriptionId) -> bool {
        self.listeners.remove(owner, subscription)
    }
}

impl DistributedObject for DistributedMap {
    fn object_id(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Map
    }

    fn subscribe(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId {
        self.add_entry_listener(owner, callback)
    }

    fn unsubscribe(&self, owner: &str, subscription: &SubscriptionId) -> bool {
        self.remove_entry_listener(owner, subscription)
    }

    fn release_owner(&self, owner: &str) -> usize {
        self.listeners.drop_owner(owner)
    }
}
