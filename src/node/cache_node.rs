use anyhow::{anyhow, Result};
use async_channel::{bounded, Receiver, Sender};
use async_std::future::timeout;
use domain_keys::keys::RouteKey;
use log::*;
use service_uptime::Uptime;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::admin::{AdminMessage, ObjectKind};
use crate::config::{NodeConfig, NodeRole};
use crate::dispatcher::{CommandDispatcher, Dispatch};
use crate::error::CacheError;
use crate::grid::{CacheListener, DistributedObject, DistributedTopic, Grid, GridConnection};
use crate::registry::{ListenerRegistry, SharedIndex};
use crate::status::{JsonString, NodeState, NodeStatus};

pub enum Command {
    AddListener(
        Arc<dyn DistributedObject>,
        Arc<dyn CacheListener>,
        Sender<Result<String>>,
    ),
    ListenerIds(String, Sender<Result<Vec<String>>>),
    OwnedIds(Sender<Vec<String>>),
    Publish(AdminMessage, Sender<Result<()>>),
    Admin(String), // raw text delivered on the admin topic
    Status(Sender<JsonString>),
    Shutdown,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AddListener(object, _, _) => write!(f, "AddListener({})", object.object_id()),
            Command::ListenerIds(object_id, _) => write!(f, "ListenerIds({})", object_id),
            Command::OwnedIds(_) => write!(f, "OwnedIds"),
            Command::Publish(msg, _) => write!(f, "Publish({})", msg),
            Command::Admin(text) => write!(f, "Admin({})", text),
            Command::Status(_) => write!(f, "Status"),
            Command::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// everything the handler loop owns
pub struct NodeCore {
    id: String,
    role: NodeRole,
    uptime: Uptime,
    connection: Arc<GridConnection>,
    admin_topic: Arc<DistributedTopic>,
    registry: ListenerRegistry,
    dispatcher: CommandDispatcher,
    op_timeout: Duration,
}

impl NodeCore {
    async fn publish(&self, message: &AdminMessage) -> Result<()> {
        if !self.connection.is_connected() {
            return Err(CacheError::Disconnected(self.id.clone()).into());
        }

        let text = message.to_wire()?;
        let delivered = timeout(self.op_timeout, self.admin_topic.publish(&text))
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout.as_millis() as u64))?;

        info!(
            "node {} published {} to {} subscriber(s)",
            self.id, message, delivered
        );

        Ok(())
    }
}

// the handler loop; the only code that touches the registry
pub async fn handler(mut core: NodeCore, rx: Receiver<Command>) -> Result<()> {
    let mut state = NodeState::Running;
    let mut error_count: u32 = 0;

    while let Ok(cmd) = rx.recv().await {
        debug!("node {} recv cmd: {:?}", core.id, cmd);
        match cmd {
            Command::AddListener(object, callback, tx) => {
                let resp = core
                    .registry
                    .register(object.as_ref(), callback)
                    .await
                    .map_err(anyhow::Error::from);
                if resp.is_err() {
                    error_count = tally(error_count, 1);
                }
                error_count = tally(error_count, send_response(resp, tx).await);
            }
            Command::ListenerIds(object_id, tx) => {
                let resp = core
                    .registry
                    .ids_for(&object_id)
                    .await
                    .map_err(anyhow::Error::from);
                error_count = tally(error_count, send_response(resp, tx).await);
            }
            Command::OwnedIds(tx) => {
                let mut ids: Vec<String> = core.registry.all_owned_ids().into_iter().collect();
                ids.sort();
                error_count = tally(error_count, send_response(ids, tx).await);
            }
            Command::Publish(message, tx) => {
                let resp = core.publish(&message).await;
                if let Err(e) = &resp {
                    error_count = tally(error_count, 1);
                    error!("node {} could not publish {}: {}", core.id, message, e);
                }
                error_count = tally(error_count, send_response(resp, tx).await);
            }
            Command::Admin(text) => {
                match core.dispatcher.dispatch_wire(&text, &mut core.registry).await {
                    Ok(Dispatch::Terminated) => {
                        state = NodeState::Shutdown;
                        info!("node id: {}, state: {:?}", core.id, state);
                        break;
                    }
                    Ok(Dispatch::Failed) => error_count = tally(error_count, 1),
                    Ok(_) => (),
                    Err(e) => {
                        error_count = tally(error_count, 1);
                        error!("node {} rejected admin message {}: {}", core.id, text, e);
                    }
                }
            }
            Command::Status(tx) => {
                let status = NodeStatus::new(
                    core.id.clone(),
                    core.role,
                    state.clone(),
                    core.uptime.to_string(),
                    error_count,
                    core.registry.len(),
                );

                let msg = status.to_json();
                debug!("status response: {}", msg);
                error_count = tally(error_count, send_response(msg, tx).await);
            }
            Command::Shutdown => {
                core.dispatcher.shutdown(&mut core.registry).await;
                state = NodeState::Shutdown;
                info!("node id: {}, state: {:?}", core.id, state);
                break;
            }
        }
    }

    // a shutdown is terminal; anything still queued is refused
    rx.close();

    Ok(())
}

async fn send_response<T>(msg: T, tx: Sender<T>) -> u32 {
    if tx.send(msg).await.is_err() {
        error!("error returning response, the requester went away");
        1
    } else {
        0
    }
}

// anyone can publish on the admin topic, so the count must not overflow
fn tally(count: u32, errors: u32) -> u32 {
    count.saturating_add(errors)
}

/// A cache node: a grid member or a thin client.  All listener bookkeeping
/// happens on a background task; this handle only sends it commands.
pub struct CacheNode {
    id: String,
    role: NodeRole,
    uptime: Uptime,
    connection: Arc<GridConnection>,
    request_tx: Sender<Command>,
    done_rx: Receiver<()>,
    broadcast_shutdown: bool,
}

impl CacheNode {
    /// validate the config, join the grid and start the node's tasks
    pub async fn start(grid: &Grid, config: NodeConfig) -> Result<CacheNode> {
        config.validate()?;
        if config.cluster_name != grid.cluster_name() {
            return Err(CacheError::Configuration(format!(
                "node configured for cluster {} cannot join {}",
                config.cluster_name,
                grid.cluster_name()
            ))
            .into());
        }

        let id = RouteKey::create();
        info!("starting up {:?} node, id: {}", config.role, id);

        let connection = grid.connect(&id, config.role);
        let objects = connection
            .get_topic(&config.admin_topic)
            .and_then(|topic| Ok((topic, connection.get_map(&config.index_map)?)));

        // a half-started node must not stay joined to the grid
        let (admin_topic, index_map) = match objects {
            Ok(objects) => objects,
            Err(e) => {
                connection.disconnect();
                return Err(e.into());
            }
        };
        let index = SharedIndex::new(index_map, config.operation_timeout());

        let (request_tx, request_rx) = bounded(250);
        let (done_tx, done_rx) = bounded::<()>(1);

        // subscribe before returning so the node sees everything published from here on
        let (_, admin_rx) = admin_topic.subscribe(&id);
        let forward_tx = request_tx.clone();
        async_std::task::spawn(async move {
            while let Ok(text) = admin_rx.recv().await {
                if forward_tx.send(Command::Admin(text)).await.is_err() {
                    break;
                }
            }
        });

        let core = NodeCore {
            id: id.clone(),
            role: config.role,
            uptime: Uptime::new(),
            connection: connection.clone(),
            admin_topic,
            registry: ListenerRegistry::new(&id, index),
            dispatcher: CommandDispatcher::new(connection.clone()),
            op_timeout: config.operation_timeout(),
        };

        let hid = id.clone();
        async_std::task::spawn(async move {
            let _done = done_tx;
            match handler(core, request_rx).await {
                Ok(()) => info!("node handler exit for node id: {}", hid),
                Err(e) => error!("node exit with error: {:?}", e),
            }
        });

        let node = CacheNode {
            id,
            role: config.role,
            uptime: Uptime::new(),
            connection,
            request_tx,
            done_rx,
            broadcast_shutdown: config.broadcast_shutdown,
        };

        info!("node created: {:?}", &node);

        Ok(node)
    }

    pub async fn member(grid: &Grid) -> Result<CacheNode> {
        CacheNode::start(grid, NodeConfig::member(grid.cluster_name())).await
    }

    pub async fn client(grid: &Grid) -> Result<CacheNode> {
        CacheNode::start(grid, NodeConfig::client(grid.cluster_name())).await
    }

    /// return the node's id
    pub fn id(&self) -> String {
        self.id.to_string()
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn get_uptime(&self) -> String {
        self.uptime.to_string()
    }

    /// the node's grid connection
    pub fn connection(&self) -> &GridConnection {
        &self.connection
    }

    pub fn is_running(&self) -> bool {
        !self.request_tx.is_closed()
    }

    /// This is invoked by the client to enable sending command request to
    /// the node
    pub fn request_channel(&self) -> Sender<Command> {
        self.request_tx.clone()
    }

    async fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (responder, rx) = bounded(1);
        self.request_tx
            .send(build(responder))
            .await
            .map_err(|_| CacheError::Disconnected(self.id.clone()))?;

        rx.recv()
            .await
            .map_err(|_| CacheError::Disconnected(self.id.clone()).into())
    }

    /// Attach `callback` to `object`.  Returns the new listener id; a failed
    /// grid call is returned as is.
    pub async fn add_listener_for(
        &self,
        object: Arc<dyn DistributedObject>,
        callback: Arc<dyn CacheListener>,
    ) -> Result<String> {
        self.request(|tx| Command::AddListener(object, callback, tx))
            .await?
    }

    /// Ask the owner of `listener_id`, whichever node that is, to release it.
    /// Takes effect once the owner processes the broadcast.  Only putting the
    /// request on the admin topic can fail here; a failed release on the
    /// owner is logged and counted there, never returned to the requester.
    pub async fn remove_listener_for(&self, object_id: &str, listener_id: &str) -> Result<()> {
        let message = AdminMessage::remove_listener(object_id, listener_id)?;
        self.publish(message).await
    }

    /// the shared index entry for `object_id`
    pub async fn get_listener_ids_for(&self, object_id: &str) -> Result<Vec<String>> {
        self.request(|tx| Command::ListenerIds(object_id.to_string(), tx))
            .await?
    }

    /// ids of the listeners this node owns, sorted
    pub async fn owned_listener_ids(&self) -> Result<Vec<String>> {
        self.request(Command::OwnedIds).await
    }

    /// ask every member to create the structure before anyone listens on it
    pub async fn create_instance(&self, kind: ObjectKind, id: &str) -> Result<()> {
        if self.role != NodeRole::Member {
            return Err(CacheError::NotPermitted(format!(
                "client {} cannot originate {} {}",
                self.id, kind, id
            ))
            .into());
        }

        let message = AdminMessage::create_instance(kind, id)?;
        self.publish(message).await
    }

    /// put a message on the admin topic
    pub async fn publish(&self, message: AdminMessage) -> Result<()> {
        self.request(|tx| Command::Publish(message, tx)).await?
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        match self.request(Command::Status).await {
            Ok(js) => Ok(serde_json::from_str(&js)?),
            Err(_) => Ok(NodeStatus::stopped(
                self.id(),
                self.role,
                self.get_uptime(),
            )),
        }
    }

    /// Release every owned listener and leave the grid.  With
    /// `broadcast_shutdown` the node announces its own SHUTDOWN_INSTANCE and
    /// acts on it when it comes back; otherwise it shuts down directly.
    /// Calling stop on a stopped node is a no-op.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        let announced = if self.broadcast_shutdown {
            match self.publish(AdminMessage::shutdown(&self.id)?).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("node {} could not announce shutdown: {}", self.id, e);
                    false
                }
            }
        } else {
            false
        };

        if !announced && self.request_tx.send(Command::Shutdown).await.is_err() {
            debug!("node {} already stopped", self.id);
        }

        // the handler drops its end when it exits
        if self.done_rx.recv().await.is_ok() {
            return Err(anyhow!("unexpected completion signal from node {}", self.id));
        }

        Ok(())
    }
}

impl fmt::Debug for CacheNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheNode")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("cluster", &self.connection.cluster_name())
            .field("running", &self.is_running())
            .finish()
    }
}
