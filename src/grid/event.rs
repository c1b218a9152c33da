/// mutation events and the callbacks the grid invokes for them
///
use domain_keys::keys::RouteKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

use super::locked;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Put,
    Update,
    Remove,
    Message,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Put => "put",
            EventKind::Update => "update",
            EventKind::Remove => "remove",
            EventKind::Message => "message",
        };
        f.write_str(name)
    }
}

/// a single mutation observed on a distributed object.  collection events
/// carry no key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEvent {
    pub object_id: String,
    pub kind: EventKind,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl CacheEvent {
    pub fn entry(
        object_id: &str,
        kind: EventKind,
        key: &str,
        value: Option<String>,
    ) -> CacheEvent {
        CacheEvent {
            object_id: object_id.to_string(),
            kind,
            key: Some(key.to_string()),
            value,
        }
    }

    pub fn item(object_id: &str, kind: EventKind, value: &str) -> CacheEvent {
        CacheEvent {
            object_id: object_id.to_string(),
            kind,
            key: None,
            value: Some(value.to_string()),
        }
    }

    pub fn message(object_id: &str, body: String) -> CacheEvent {
        CacheEvent {
            object_id: object_id.to_string(),
            kind: EventKind::Message,
            key: None,
            value: Some(body),
        }
    }
}

/// node-local callback invoked by the grid on mutation events
pub trait CacheListener: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

impl<F> CacheListener for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        (self)(event)
    }
}

/// handle for one native subscription on a grid object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn create() -> SubscriptionId {
        SubscriptionId(RouteKey::create())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Subscription {
    owner: String,
    id: SubscriptionId,
    callback: Arc<dyn CacheListener>,
}

/// the native subscriptions held by one map or collection
#[derive(Default)]
pub(crate) struct ListenerTable {
    entries: Mutex<Vec<Subscription>>,
}

impl ListenerTable {
    pub(crate) fn add(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId {
        let id = SubscriptionId::create();
        locked(&self.entries).push(Subscription {
            owner: owner.to_string(),
            id: id.clone(),
            callback,
        });

        id
    }

    /// only the owning node can drop its subscription
    pub(crate) fn remove(&self, owner: &str, id: &SubscriptionId) -> bool {
        let mut entries = locked(&self.entries);
        let before = entries.len();
        entries.retain(|s| !(s.owner == owner && &s.id == id));
        entries.len() < before
    }

    pub(crate) fn drop_owner(&self, owner: &str) -> usize {
        let mut entries = locked(&self.entries);
        let before = entries.len();
        entries.retain(|s| s.owner != owner);
        before - entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        locked(&self.entries).len()
    }

    // callbacks run outside the lock so a listener may touch the object again
    pub(crate) fn fire(&self, event: CacheEvent) {
        let callbacks: Vec<Arc<dyn CacheListener>> = locked(&self.entries)
            .iter()
            .map(|s| s.callback.clone())
            .collect();

        for cb in callbacks {
            cb.on_event(&event);
        }
    }
}
