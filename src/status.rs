/// node status structs
///
use serde::{Deserialize, Serialize};

use crate::config::NodeRole;

pub type JsonString = String;

pub const OK: &str = "ok";
pub const DOWN: &str = "down";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Running,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub role: NodeRole,
    pub status: String,
    pub state: NodeState,
    pub uptime: String,
    pub error_count: u32,
    pub owned_listeners: usize,
}

impl NodeStatus {
    pub fn new(
        node_id: String,
        role: NodeRole,
        state: NodeState,
        uptime: String,
        error_count: u32,
        owned_listeners: usize,
    ) -> NodeStatus {
        let status = match state {
            NodeState::Running => OK,
            NodeState::Shutdown => DOWN,
        };

        NodeStatus {
            node_id,
            role,
            status: status.to_string(),
            state,
            uptime,
            error_count,
            owned_listeners,
        }
    }

    /// the status reported for a node whose actor has already exited
    pub fn stopped(node_id: String, role: NodeRole, uptime: String) -> NodeStatus {
        NodeStatus::new(node_id, role, NodeState::Shutdown, uptime, 0, 0)
    }

    /// json rendering; a serializer failure is reported inside the json itself
    pub fn to_json(&self) -> JsonString {
        match serde_json::to_string(self) {
            Ok(js) => js,
            Err(e) => {
                format!(r#"{}"status":"json parse error: {:?}"{}"#, "{", e, "}\n")
            }
        }
    }
}
