/// listener bookkeeping for one node
///
/// `ListenerRegistry` is the node-private table of registrations this node
/// physically owns.  `SharedIndex` is the cluster-visible map from object id
/// to every listener id registered against it, on any node.  The index is
/// advisory: it says an id exists somewhere, not who owns it.
///
use async_std::future::timeout;
use domain_keys::keys::RouteKey;
use hashbrown::{HashMap, HashSet};
use log::*;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::grid::{CacheListener, DistributedMap, DistributedObject, SubscriptionId};

const MAX_CAS_ATTEMPTS: u64 = 16;

pub struct ListenerRegistration {
    pub listener_id: String,
    pub object_id: String,
    pub subscription: SubscriptionId,
    pub callback: Arc<dyn CacheListener>,
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("listener_id", &self.listener_id)
            .field("object_id", &self.object_id)
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

/// Cluster-wide index: object id -> json array of listener ids.  Every
/// change is a compare-and-set on the object's entry, retried with a short
/// random back-off when another node got there first.
pub struct SharedIndex {
    map: Arc<DistributedMap>,
    op_timeout: Duration,
}

impl SharedIndex {
    pub fn new(map: Arc<DistributedMap>, op_timeout: Duration) -> SharedIndex {
        SharedIndex { map, op_timeout }
    }

    pub fn name(&self) -> &str {
        self.map.name()
    }

    async fn bounded<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.op_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.op_timeout.as_millis() as u64)),
        }
    }

    /// ids in registration order
    pub async fn ids_for(&self, object_id: &str) -> Result<Vec<String>> {
        self.bounded(async {
            let current = self.map.get(object_id).await;
            decode(current.as_deref())
        })
        .await
    }

    pub async fn add(&self, object_id: &str, listener_id: &str) -> Result<()> {
        self.bounded(self.update(object_id, |ids| {
            if !ids.iter().any(|id| id == listener_id) {
                ids.push(listener_id.to_string());
            }
        }))
        .await
    }

    pub async fn remove(&self, object_id: &str, listener_id: &str) -> Result<()> {
        self.bounded(self.update(object_id, |ids| ids.retain(|id| id != listener_id)))
            .await
    }

    /// remove every id in `owned` from the object's entry
    pub async fn subtract(&self, object_id: &str, owned: &HashSet<String>) -> Result<()> {
        self.bounded(self.update(object_id, |ids| ids.retain(|id| !owned.contains(id))))
            .await
    }

    async fn update<F>(&self, object_id: &str, edit: F) -> Result<()>
    where
        F: Fn(&mut Vec<String>),
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.map.get(object_id).await;
            let mut ids = decode(current.as_deref())?;
            edit(&mut ids);

            if current.is_none() && ids.is_empty() {
                return Ok(());
            }

            let next = if ids.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&ids)?)
            };

            if self.map.replace(object_id, current.as_deref(), next).await {
                return Ok(());
            }

            debug!(
                "index entry {} changed underneath us, attempt {}",
                object_id, attempt
            );
            let pause = fastrand::u64(1..=5) * attempt;
            async_std::task::sleep(Duration::from_millis(pause)).await;
        }

        Err(CacheError::Contention(object_id.to_string()))
    }
}

fn decode(value: Option<&str>) -> Result<Vec<String>> {
    match value {
        Some(js) => Ok(serde_json::from_str(js)?),
        None => Ok(vec![]),
    }
}

/// the registrations this node owns plus its handle on the shared index
pub struct ListenerRegistry {
    node_id: String,
    local: HashMap<String, ListenerRegistration>,
    index: SharedIndex,
}

impl ListenerRegistry {
    pub fn new(node_id: &str, index: SharedIndex) -> ListenerRegistry {
        ListenerRegistry {
            node_id: node_id.to_string(),
            local: HashMap::new(),
            index,
        }
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Attach `callback` to `object` and publish the new id in the shared
    /// index.  When the index write fails the local registration is kept and
    /// the error is returned; local state is then ahead of the index.
    pub async fn register(
        &mut self,
        object: &dyn DistributedObject,
        callback: Arc<dyn CacheListener>,
    ) -> Result<String> {
        let mut listener_id = RouteKey::create();
        while self.local.contains_key(&listener_id) {
            listener_id = RouteKey::create();
        }

        let object_id = object.object_id().to_string();
        let subscription = object.subscribe(&self.node_id, callback.clone());
        self.local.insert(
            listener_id.clone(),
            ListenerRegistration {
                listener_id: listener_id.clone(),
                object_id: object_id.clone(),
                subscription,
                callback,
            },
        );

        if let Err(e) = self.index.add(&object_id, &listener_id).await {
            error!(
                "listener {} is registered on node {} but missing from index {} for {}: {}",
                listener_id,
                self.node_id,
                self.index.name(),
                object_id,
                e
            );
            return Err(e);
        }

        info!(
            "node {} registered listener {} on {}",
            self.node_id, listener_id, object_id
        );

        Ok(listener_id)
    }

    /// never fails for an unknown id
    pub fn unregister_local(&mut self, listener_id: &str) -> Option<ListenerRegistration> {
        self.local.remove(listener_id)
    }

    pub fn owns(&self, listener_id: &str) -> bool {
        self.local.contains_key(listener_id)
    }

    pub fn get(&self, listener_id: &str) -> Option<&ListenerRegistration> {
        self.local.get(listener_id)
    }

    /// read of the shared index; includes ids owned by other nodes
    pub async fn ids_for(&self, object_id: &str) -> Result<Vec<String>> {
        self.index.ids_for(object_id).await
    }

    pub fn all_owned_ids(&self) -> HashSet<String> {
        self.local.keys().cloned().collect()
    }

    /// forget every local registration
    pub fn clear_local(&mut self) -> Vec<ListenerRegistration> {
        self.local.drain().map(|(_, reg)| reg).collect()
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::ObjectKind;
    use crate::config::NodeRole;
    use crate::grid::{CacheEvent, Grid};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry_for(grid: &Grid, node_id: &str) -> ListenerRegistry {
        let conn = grid.connect(node_id, NodeRole::Member);
        let map = conn.get_map("__ids").unwrap();
        ListenerRegistry::new(node_id, SharedIndex::new(map, Duration::from_secs(1)))
    }

    #[test]
    fn register_is_visible_cluster_wide() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let mut a = registry_for(&grid, "node-a");
            let mut b = registry_for(&grid, "node-b");
            let list = grid
                .connect("node-x", NodeRole::Member)
                .materialize(ObjectKind::Collection, "distList")
                .unwrap();

            let id1 = a
                .register(list.as_ref(), Arc::new(|_: &CacheEvent| {}))
                .await
                .unwrap();
            let id2 = b
                .register(list.as_ref(), Arc::new(|_: &CacheEvent| {}))
                .await
                .unwrap();

            assert_eq!(id1.len(), 16);
            assert_ne!(id1, id2);
            assert_eq!(a.ids_for("distList").await.unwrap(), vec![id1.clone(), id2.clone()]);
            assert_eq!(b.ids_for("distList").await.unwrap().len(), 2);

            assert!(a.owns(&id1));
            assert!(!a.owns(&id2));
            assert_eq!(a.all_owned_ids().len(), 1);
            assert_eq!(a.get(&id1).unwrap().object_id, "distList");
        });
    }

    #[test]
    fn unregister_unknown_is_a_no_op() {
        let grid = Grid::new("test");
        let mut a = registry_for(&grid, "node-a");
        assert!(a.unregister_local("nope").is_none());
        assert!(a.is_empty());
    }

    #[test]
    fn index_remove_and_subtract() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let conn = grid.connect("node-a", NodeRole::Member);
            let map = conn.get_map("__ids").unwrap();
            let index = SharedIndex::new(map.clone(), Duration::from_secs(1));

            for id in ["l1", "l2", "l3"] {
                index.add("obj", id).await.unwrap();
            }
            index.add("obj", "l2").await.unwrap();
            assert_eq!(index.ids_for("obj").await.unwrap(), vec!["l1", "l2", "l3"]);

            index.remove("obj", "l2").await.unwrap();
            index.remove("obj", "missing").await.unwrap();
            assert_eq!(index.ids_for("obj").await.unwrap(), vec!["l1", "l3"]);

            let owned: HashSet<String> = ["l1", "l3"].iter().map(|s| s.to_string()).collect();
            index.subtract("obj", &owned).await.unwrap();
            assert!(index.ids_for("obj").await.unwrap().is_empty());
            assert_eq!(map.get("obj").await, None);

            index.subtract("other", &owned).await.unwrap();
            assert!(map.is_empty().await);
        });
    }

    #[test]
    fn concurrent_removals_do_not_lose_updates() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let conn = grid.connect("node-a", NodeRole::Member);
            let map = conn.get_map("__ids").unwrap();
            let index = Arc::new(SharedIndex::new(map, Duration::from_secs(5)));

            let ids: Vec<String> = (0..20).map(|n| format!("l{}", n)).collect();
            for id in ids.iter() {
                index.add("obj", id).await.unwrap();
            }

            let mut handles = vec![];
            for id in ids.into_iter() {
                let index = index.clone();
                handles.push(async_std::task::spawn(async move {
                    index.remove("obj", &id).await
                }));
            }
            for h in handles {
                assert!(h.await.is_ok());
            }

            assert!(index.ids_for("obj").await.unwrap().is_empty());
        });
    }

    #[test]
    fn corrupt_index_entry() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let conn = grid.connect("node-a", NodeRole::Member);
            let map = conn.get_map("__ids").unwrap();
            map.put("obj", "not-json").await;
            let index = SharedIndex::new(map, Duration::from_secs(1));
            assert!(matches!(
                index.ids_for("obj").await,
                Err(CacheError::Serialization(_))
            ));
        });
    }

    #[test]
    fn failed_index_write_keeps_local_registration() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let conn = grid.connect("node-a", NodeRole::Member);
            let map = conn.get_map("__ids").unwrap();
            map.put("distList", "not-json").await;
            let list = conn.get_collection("distList").unwrap();
            let mut registry =
                ListenerRegistry::new("node-a", SharedIndex::new(map, Duration::from_secs(1)));

            let result = registry
                .register(list.as_ref(), Arc::new(|_: &CacheEvent| {}))
                .await;
            assert!(matches!(result, Err(CacheError::Serialization(_))));

            // local state is ahead of the index
            assert_eq!(registry.len(), 1);
            let id = registry.all_owned_ids().into_iter().next().unwrap();
            assert!(registry.owns(&id));
            assert_eq!(list.listener_count(), 1);
        });
    }

    // every attempt finds the entry changed since it was read
    fn always_stale<'a>(
        map: &'a DistributedMap,
        n: &'a AtomicUsize,
    ) -> impl Fn(&mut Vec<String>) + 'a {
        move |ids: &mut Vec<String>| {
            let seen = n.fetch_add(1, Ordering::SeqCst);
            map.overwrite("obj", &format!(r#"["other-{}"]"#, seen));
            ids.push("l1".to_string());
        }
    }

    #[test]
    fn endless_contention_gives_up() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let conn = grid.connect("node-a", NodeRole::Member);
            let map = conn.get_map("__ids").unwrap();
            let index = SharedIndex::new(map.clone(), Duration::from_secs(5));
            let attempts = AtomicUsize::new(0);

            let result = index.update("obj", always_stale(&map, &attempts)).await;
            assert!(matches!(result, Err(CacheError::Contention(ref id)) if id == "obj"));
            assert_eq!(attempts.load(Ordering::SeqCst), MAX_CAS_ATTEMPTS as usize);
        });
    }

    #[test]
    fn slow_update_times_out() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let conn = grid.connect("node-a", NodeRole::Member);
            let map = conn.get_map("__ids").unwrap();
            let index = SharedIndex::new(map.clone(), Duration::from_millis(10));
            let attempts = AtomicUsize::new(0);

            let result = index
                .bounded(index.update("obj", always_stale(&map, &attempts)))
                .await;
            assert!(matches!(result, Err(CacheError::Timeout(10))));
            assert!(attempts.load(Ordering::SeqCst) < MAX_CAS_ATTEMPTS as usize);
        });
    }
}
