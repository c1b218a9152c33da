/// in-process distributed substrate.
///
/// The grid holds the cluster's maps, collections and topics and hands each
/// node a `GridConnection` carrying its identity.  Objects are created on
/// first access.  Native listener subscriptions are tagged with the owning
/// node id so a disconnect can drop them all.
///
pub mod collection;
pub mod event;
pub mod map;
pub mod object;
pub mod topic;

use hashbrown::HashMap;
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::admin::ObjectKind;
use crate::config::NodeRole;
use crate::error::{CacheError, Result};

pub use collection::DistributedCollection;
pub use event::{CacheEvent, CacheListener, EventKind, SubscriptionId};
pub use map::DistributedMap;
pub use object::{
    DistributedObject, SupportsEntryListener, SupportsItemListener, SupportsMessageListener,
};
pub use topic::DistributedTopic;

// a panicked holder leaves plain data behind; keep serving it
pub(crate) fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
enum GridObject {
    Map(Arc<DistributedMap>),
    Collection(Arc<DistributedCollection>),
    Topic(Arc<DistributedTopic>),
}

impl GridObject {
    fn create(kind: ObjectKind, id: &str) -> GridObject {
        match kind {
            ObjectKind::Map => GridObject::Map(Arc::new(DistributedMap::new(id))),
            ObjectKind::Topic => GridObject::Topic(Arc::new(DistributedTopic::new(id))),
            ObjectKind::Set | ObjectKind::Collection | ObjectKind::Queue => {
                GridObject::Collection(Arc::new(DistributedCollection::new(id, kind)))
            }
        }
    }

    fn as_object(&self) -> Arc<dyn DistributedObject> {
        match self {
            GridObject::Map(m) => m.clone(),
            GridObject::Collection(c) => c.clone(),
            GridObject::Topic(t) => t.clone(),
        }
    }
}

struct GridInner {
    cluster_name: String,
    objects: Mutex<HashMap<String, GridObject>>,
    members: Mutex<HashMap<String, NodeRole>>,
}

/// shared cluster state; clones refer to the same cluster
#[derive(Clone)]
pub struct Grid {
    inner: Arc<GridInner>,
}

impl Grid {
    pub fn new(cluster_name: &str) -> Grid {
        info!("grid created for cluster: {}", cluster_name);
        Grid {
            inner: Arc::new(GridInner {
                cluster_name: cluster_name.to_string(),
                objects: Mutex::new(HashMap::new()),
                members: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.inner.cluster_name
    }

    /// join the grid as `node_id`
    pub fn connect(&self, node_id: &str, role: NodeRole) -> Arc<GridConnection> {
        locked(&self.inner.members).insert(node_id.to_string(), role);
        info!("node {} joined cluster {} as {:?}", node_id, self.cluster_name(), role);

        Arc::new(GridConnection {
            node_id: node_id.to_string(),
            role,
            grid: self.clone(),
            connected: AtomicBool::new(true),
        })
    }

    /// ids of the currently connected nodes, sorted
    pub fn connected_nodes(&self) -> Vec<String> {
        let mut ids: Vec<String> = locked(&self.inner.members).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn get_or_create(&self, kind: ObjectKind, id: &str) -> Result<GridObject> {
        let mut objects = locked(&self.inner.objects);
        if let Some(existing) = objects.get(id) {
            let existing_kind = existing.as_object().kind();
            if existing_kind != kind {
                return Err(CacheError::KindMismatch {
                    id: id.to_string(),
                    existing: existing_kind.to_string(),
                    requested: kind.to_string(),
                });
            }
            return Ok(existing.clone());
        }

        debug!("creating distributed {} {}", kind, id);
        let created = GridObject::create(kind, id);
        objects.insert(id.to_string(), created.clone());

        Ok(created)
    }

    fn objects(&self) -> Vec<Arc<dyn DistributedObject>> {
        let mut list: Vec<Arc<dyn DistributedObject>> = locked(&self.inner.objects)
            .values()
            .map(|o| o.as_object())
            .collect();
        list.sort_by(|a, b| a.object_id().cmp(b.object_id()));
        list
    }

    fn leave(&self, node_id: &str) {
        locked(&self.inner.members).remove(node_id);
    }
}

/// one node's view of the grid
pub struct GridConnection {
    node_id: String,
    role: NodeRole,
    grid: Grid,
    connected: AtomicBool,
}

impl GridConnection {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn cluster_name(&self) -> &str {
        self.grid.cluster_name()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CacheError::Disconnected(self.node_id.clone()))
        }
    }

    pub fn get_map(&self, name: &str) -> Result<Arc<DistributedMap>> {
        self.ensure_connected()?;
        match self.grid.get_or_create(ObjectKind::Map, name)? {
            GridObject::Map(m) => Ok(m),
            other => Err(mismatch(name, &other, ObjectKind::Map)),
        }
    }

    pub fn get_set(&self, name: &str) -> Result<Arc<DistributedCollection>> {
        self.collection(ObjectKind::Set, name)
    }

    pub fn get_collection(&self, name: &str) -> Result<Arc<DistributedCollection>> {
        self.collection(ObjectKind::Collection, name)
    }

    pub fn get_queue(&self, name: &str) -> Result<Arc<DistributedCollection>> {
        self.collection(ObjectKind::Queue, name)
    }

    pub fn get_topic(&self, name: &str) -> Result<Arc<DistributedTopic>> {
        self.ensure_connected()?;
        match self.grid.get_or_create(ObjectKind::Topic, name)? {
            GridObject::Topic(t) => Ok(t),
            other => Err(mismatch(name, &other, ObjectKind::Topic)),
        }
    }

    fn collection(&self, kind: ObjectKind, name: &str) -> Result<Arc<DistributedCollection>> {
        self.ensure_connected()?;
        match self.grid.get_or_create(kind, name)? {
            GridObject::Collection(c) => Ok(c),
            other => Err(mismatch(name, &other, kind)),
        }
    }

    /// Eagerly create a structure.  Only members hold partitions, so a
    /// client asking for this is refused.
    pub fn materialize(&self, kind: ObjectKind, id: &str) -> Result<Arc<dyn DistributedObject>> {
        self.ensure_connected()?;
        if self.role != NodeRole::Member {
            return Err(CacheError::NotPermitted(format!(
                "client {} cannot create {} {}",
                self.node_id, kind, id
            )));
        }

        Ok(self.grid.get_or_create(kind, id)?.as_object())
    }

    /// scan the known objects for a matching identity
    pub fn find_object(&self, id: &str) -> Option<Arc<dyn DistributedObject>> {
        self.distributed_objects()
            .into_iter()
            .find(|o| o.object_id() == id)
    }

    pub fn distributed_objects(&self) -> Vec<Arc<dyn DistributedObject>> {
        self.grid.objects()
    }

    /// Leave the grid.  Every native subscription this node holds, topic
    /// subscriptions included, is dropped.  Returns how many were dropped.
    pub fn disconnect(&self) -> usize {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return 0;
        }

        let dropped: usize = self
            .grid
            .objects()
            .iter()
            .map(|o| o.release_owner(&self.node_id))
            .sum();

        self.grid.leave(&self.node_id);
        info!(
            "node {} left cluster {}, dropped {} subscription(s)",
            self.node_id,
            self.cluster_name(),
            dropped
        );

        dropped
    }
}

fn mismatch(id: &str, found: &GridObject, requested: ObjectKind) -> CacheError {
    CacheError::KindMismatch {
        id: id.to_string(),
        existing: found.as_object().kind().to_string(),
        requested: requested.to_string(),
    }
}
