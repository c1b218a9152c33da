/// admin command handling.
///
/// Every node sees every admin message.  The dispatcher keeps no state of
/// its own between messages: what it does depends only on the message and
/// on what the node's registry currently owns.  Commands meant for another
/// node are silent no-ops, which also makes replays harmless.
///
use anyhow::anyhow;
use log::*;
use std::sync::Arc;

use crate::admin::{AdminMessage, ObjectKind};
use crate::config::NodeRole;
use crate::error::{CacheError, Result};
use crate::grid::GridConnection;
use crate::registry::ListenerRegistry;
use crate::transacted::TransactedAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// not addressed to, or not ownable by, this node
    Ignored,
    Applied,
    /// the guarded action failed; already logged
    Failed,
    /// the node released everything and left the grid
    Terminated,
}

pub struct CommandDispatcher {
    node_id: String,
    role: NodeRole,
    connection: Arc<GridConnection>,
}

impl CommandDispatcher {
    pub fn new(connection: Arc<GridConnection>) -> CommandDispatcher {
        CommandDispatcher {
            node_id: connection.node_id().to_string(),
            role: connection.role(),
            connection,
        }
    }

    /// decode and handle one message read from the admin topic.  an error
    /// here concerns this message only.
    pub async fn dispatch_wire(
        &self,
        text: &str,
        registry: &mut ListenerRegistry,
    ) -> Result<Dispatch> {
        let message = AdminMessage::from_wire(text)?;
        Ok(self.dispatch(&message, registry).await)
    }

    pub async fn dispatch(
        &self,
        message: &AdminMessage,
        registry: &mut ListenerRegistry,
    ) -> Dispatch {
        debug!("node {} dispatching {}", self.node_id, message);
        match message {
            AdminMessage::RemoveListener {
                object_id,
                listener_id,
            } => self.remove_listener(object_id, listener_id, registry).await,
            AdminMessage::ShutdownInstance { target_node_id } => {
                if target_node_id != &self.node_id {
                    return Dispatch::Ignored;
                }
                self.shutdown(registry).await
            }
            AdminMessage::CreateInCacheInstance {
                kind,
                cluster_unique_id,
            } => self.create_instance(*kind, cluster_unique_id).await,
        }
    }

    async fn remove_listener(
        &self,
        object_id: &str,
        listener_id: &str,
        registry: &mut ListenerRegistry,
    ) -> Dispatch {
        if !registry.owns(listener_id) {
            return Dispatch::Ignored;
        }

        let context = format!(
            "rollback: node {} could not release listener {} from {}",
            self.node_id, listener_id, object_id
        );
        let released = TransactedAction::new(context)
            .execute(self.release(object_id, listener_id, registry))
            .await;

        match released {
            Some(()) => {
                info!(
                    "node {} released listener {} from {}",
                    self.node_id, listener_id, object_id
                );
                Dispatch::Applied
            }
            None => Dispatch::Failed,
        }
    }

    async fn release(
        &self,
        object_id: &str,
        listener_id: &str,
        registry: &mut ListenerRegistry,
    ) -> anyhow::Result<()> {
        let object = self
            .connection
            .find_object(object_id)
            .ok_or_else(|| CacheError::ObjectNotFound(object_id.to_string()))?;

        let registered_on = registry.get(listener_id).map(|r| r.object_id.clone());
        if registered_on.as_deref() != Some(object_id) {
            return Err(anyhow!(
                "listener {} is registered on {:?}",
                listener_id,
                registered_on
            ));
        }

        if let Some(registration) = registry.unregister_local(listener_id) {
            if !object.unsubscribe(&self.node_id, &registration.subscription) {
                warn!(
                    "node {} held no native subscription for listener {}",
                    self.node_id, listener_id
                );
            }
        }

        registry.index().remove(object_id, listener_id).await?;
        Ok(())
    }

    /// Take this node's ids out of every object's index entry, forget the
    /// local registrations and leave the grid, which drops the native
    /// subscriptions with it.  Used for both SHUTDOWN_INSTANCE and local stop.
    pub async fn shutdown(&self, registry: &mut ListenerRegistry) -> Dispatch {
        let owned = registry.all_owned_ids();
        if !owned.is_empty() {
            for object in self.connection.distributed_objects() {
                let context = format!(
                    "rollback: node {} could not clear its listener ids from {}",
                    self.node_id,
                    object.object_id()
                );
                let owned = &owned;
                let index = registry.index();
                TransactedAction::new(context)
                    .execute(async move {
                        index
                            .subtract(object.object_id(), owned)
                            .await
                            .map_err(anyhow::Error::from)
                    })
                    .await;
            }
        }

        let released = registry.clear_local();
        let dropped = self.connection.disconnect();
        info!(
            "node {} shut down, released {} listener(s), dropped {} subscription(s)",
            self.node_id,
            released.len(),
            dropped
        );

        Dispatch::Terminated
    }

    async fn create_instance(&self, kind: ObjectKind, id: &str) -> Dispatch {
        if self.role != NodeRole::Member {
            return Dispatch::Ignored;
        }

        let context = format!("node {} could not create {} {}", self.node_id, kind, id);
        let connection = &self.connection;
        let created = TransactedAction::new(context)
            .execute(async {
                connection
                    .materialize(kind, id)
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            })
            .await;

        match created {
            Some(()) => Dispatch::Applied,
            None => Dispatch::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CacheEvent, Grid};
    use crate::registry::SharedIndex;
    use std::time::Duration;

    struct Fixture {
        grid: Grid,
        connection: Arc<GridConnection>,
        dispatcher: CommandDispatcher,
        registry: ListenerRegistry,
    }

    fn fixture(grid: &Grid, node_id: &str, role: NodeRole) -> Fixture {
        let connection = grid.connect(node_id, role);
        let map = connection.get_map("__ids").unwrap();
        Fixture {
            grid: grid.clone(),
            connection: connection.clone(),
            dispatcher: CommandDispatcher::new(connection),
            registry: ListenerRegistry::new(
                node_id,
                SharedIndex::new(map, Duration::from_secs(1)),
            ),
        }
    }

    fn remove(object_id: &str, listener_id: &str) -> AdminMessage {
        AdminMessage::remove_listener(object_id, listener_id).unwrap()
    }

    #[test]
    fn remove_is_ignored_by_non_owner_and_idempotent() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let mut a = fixture(&grid, "node-a", NodeRole::Member);
            let mut b = fixture(&grid, "node-b", NodeRole::Client);
            let list = a.connection.get_collection("distList").unwrap();

            let id = a
                .registry
                .register(list.as_ref(), Arc::new(|_: &CacheEvent| {}))
                .await
                .unwrap();

            let msg = remove("distList", &id);
            assert_eq!(b.dispatcher.dispatch(&msg, &mut b.registry).await, Dispatch::Ignored);
            assert!(a.registry.owns(&id));
            assert_eq!(list.listener_count(), 1);

            assert_eq!(a.dispatcher.dispatch(&msg, &mut a.registry).await, Dispatch::Applied);
            assert!(!a.registry.owns(&id));
            assert_eq!(list.listener_count(), 0);
            assert!(a.registry.ids_for("distList").await.unwrap().is_empty());

            // replay
            assert_eq!(a.dispatcher.dispatch(&msg, &mut a.registry).await, Dispatch::Ignored);
            assert_eq!(a.grid.connected_nodes().len(), 2);
        });
    }

    #[test]
    fn remove_with_wrong_object_keeps_registration() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let mut a = fixture(&grid, "node-a", NodeRole::Member);
            let list = a.connection.get_collection("distList").unwrap();
            a.connection.get_map("other").unwrap();

            let id = a
                .registry
                .register(list.as_ref(), Arc::new(|_: &CacheEvent| {}))
                .await
                .unwrap();

            for object_id in ["other", "missing"] {
                let msg = remove(object_id, &id);
                assert_eq!(a.dispatcher.dispatch(&msg, &mut a.registry).await, Dispatch::Failed);
            }

            assert!(a.registry.owns(&id));
            assert_eq!(list.listener_count(), 1);
        });
    }

    #[test]
    fn shutdown_targets_only_its_node() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let mut a = fixture(&grid, "node-a", NodeRole::Member);
            let mut b = fixture(&grid, "node-b", NodeRole::Member);
            let list = a.connection.get_collection("distList").unwrap();

            let ida = a
                .registry
                .register(list.as_ref(), Arc::new(|_: &CacheEvent| {}))
                .await
                .unwrap();
            let idb = b
                .registry
                .register(list.as_ref(), Arc::new(|_: &CacheEvent| {}))
                .await
                .unwrap();

            let msg = AdminMessage::shutdown("node-a").unwrap();
            assert_eq!(b.dispatcher.dispatch(&msg, &mut b.registry).await, Dispatch::Ignored);
            assert!(b.connection.is_connected());
            assert!(b.registry.owns(&idb));

            assert_eq!(a.dispatcher.dispatch(&msg, &mut a.registry).await, Dispatch::Terminated);
            assert!(a.registry.is_empty());
            assert!(!a.connection.is_connected());
            assert_eq!(list.listener_count(), 1);
            assert_eq!(b.registry.ids_for("distList").await.unwrap(), vec![idb]);
            assert!(!grid.connected_nodes().contains(&"node-a".to_string()));
            assert!(!ida.is_empty());
        });
    }

    #[test]
    fn only_members_create_instances() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let mut member = fixture(&grid, "node-a", NodeRole::Member);
            let mut client = fixture(&grid, "node-b", NodeRole::Client);

            let msg = AdminMessage::create_instance(ObjectKind::Map, "foo").unwrap();
            assert_eq!(
                client.dispatcher.dispatch(&msg, &mut client.registry).await,
                Dispatch::Ignored
            );
            assert!(client.connection.find_object("foo").is_none());

            assert_eq!(
                member.dispatcher.dispatch(&msg, &mut member.registry).await,
                Dispatch::Applied
            );
            assert_eq!(
                client.connection.find_object("foo").map(|o| o.kind()),
                Some(ObjectKind::Map)
            );

            // already a map
            let msg = AdminMessage::create_instance(ObjectKind::Queue, "foo").unwrap();
            assert_eq!(
                member.dispatcher.dispatch(&msg, &mut member.registry).await,
                Dispatch::Failed
            );
        });
    }

    #[test]
    fn unknown_command_is_rejected() {
        async_std::task::block_on(async move {
            let grid = Grid::new("test");
            let mut a = fixture(&grid, "node-a", NodeRole::Member);
            let result = a
                .dispatcher
                .dispatch_wire(r#"{"command":"FLUSH_ALL","arguments":[]}"#, &mut a.registry)
                .await;
            assert!(matches!(result, Err(CacheError::UnsupportedCommand(_))));

            let ok = AdminMessage::shutdown("someone-else").unwrap().to_wire().unwrap();
            let result = a.dispatcher.dispatch_wire(&ok, &mut a.registry).await;
            assert_eq!(result.unwrap(), Dispatch::Ignored);
        });
    }
}
