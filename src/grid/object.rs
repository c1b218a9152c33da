/// listener capabilities of grid objects
///
/// Maps, collections and topics each expose their own listener calls.  The
/// `DistributedObject` impls route a generic subscribe/unsubscribe to
/// whichever capability the concrete type carries.
///
use std::sync::Arc;

use super::event::{CacheListener, SubscriptionId};
use crate::admin::ObjectKind;

pub trait SupportsEntryListener {
    fn add_entry_listener(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId;
    fn remove_entry_listener(&self, owner: &str, subscription: &SubscriptionId) -> bool;
}

pub trait SupportsItemListener {
    fn add_item_listener(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId;
    fn remove_item_listener(&self, owner: &str, subscription: &SubscriptionId) -> bool;
}

pub trait SupportsMessageListener {
    fn add_message_listener(&self, owner: &str, callback: Arc<dyn CacheListener>)
        -> SubscriptionId;
    fn remove_message_listener(&self, owner: &str, subscription: &SubscriptionId) -> bool;
}

pub trait DistributedObject: Send + Sync {
    /// cluster-wide identity
    fn object_id(&self) -> &str;

    fn kind(&self) -> ObjectKind;

    fn subscribe(&self, owner: &str, callback: Arc<dyn CacheListener>) -> SubscriptionId;

    /// returns false when `owner` holds no such subscription
    fn unsubscribe(&self, owner: &str, subscription: &SubscriptionId) -> bool;

    /// drop every native subscription held by `owner`
    fn release_owner(&self, owner: &str) -> usize;
}
