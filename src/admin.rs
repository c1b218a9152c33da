/// admin channel commands and their wire encoding
///
/// Commands travel on the admin topic as a json object holding the command
/// name and its ordered string arguments.  Inside the crate they are always
/// the typed `AdminMessage`; strings only exist at the channel boundary.
///
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    RemoveListener,
    ShutdownInstance,
    CreateInCacheInstance,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::RemoveListener => "REMOVE_LISTENER",
            CommandKind::ShutdownInstance => "SHUTDOWN_INSTANCE",
            CommandKind::CreateInCacheInstance => "CREATE_INCACHE_INSTANCE",
        }
    }

    /// the fixed argument count for this command
    pub fn arity(&self) -> usize {
        match self {
            CommandKind::RemoveListener => 2,
            CommandKind::ShutdownInstance => 1,
            CommandKind::CreateInCacheInstance => 2,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "REMOVE_LISTENER" => Ok(CommandKind::RemoveListener),
            "SHUTDOWN_INSTANCE" => Ok(CommandKind::ShutdownInstance),
            "CREATE_INCACHE_INSTANCE" => Ok(CommandKind::CreateInCacheInstance),
            _ => Err(CacheError::UnsupportedCommand(s.to_string())),
        }
    }
}

/// the kinds of distributed structure the grid can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Map,
    Set,
    Collection,
    Queue,
    Topic,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Map => "MAP",
            ObjectKind::Set => "SET",
            ObjectKind::Collection => "COLLECTION",
            ObjectKind::Queue => "QUEUE",
            ObjectKind::Topic => "TOPIC",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// accepts exactly the names `as_str` produces
impl FromStr for ObjectKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MAP" => Ok(ObjectKind::Map),
            "SET" => Ok(ObjectKind::Set),
            "COLLECTION" => Ok(ObjectKind::Collection),
            "QUEUE" => Ok(ObjectKind::Queue),
            "TOPIC" => Ok(ObjectKind::Topic),
            _ => Err(CacheError::UnknownObjectKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminMessage {
    RemoveListener {
        object_id: String,
        listener_id: String,
    },
    ShutdownInstance {
        target_node_id: String,
    },
    CreateInCacheInstance {
        kind: ObjectKind,
        cluster_unique_id: String,
    },
}

// the shape carried by the admin topic
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    command: String,
    arguments: Vec<String>,
}

fn required(command: CommandKind, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(CacheError::MalformedArguments {
            command: command.to_string(),
            expected: command.arity(),
            found: 0,
        });
    }
    Ok(value.to_string())
}

impl AdminMessage {
    /// ask whichever node owns `listener_id` to release it from `object_id`
    pub fn remove_listener(object_id: &str, listener_id: &str) -> Result<AdminMessage> {
        let cmd = CommandKind::RemoveListener;
        Ok(AdminMessage::RemoveListener {
            object_id: required(cmd, object_id)?,
            listener_id: required(cmd, listener_id)?,
        })
    }

    /// ask the node identified by `target_node_id` to release everything and disconnect
    pub fn shutdown(target_node_id: &str) -> Result<AdminMessage> {
        Ok(AdminMessage::ShutdownInstance {
            target_node_id: required(CommandKind::ShutdownInstance, target_node_id)?,
        })
    }

    /// ask member nodes to materialize a structure before anyone listens on it
    pub fn create_instance(kind: ObjectKind, cluster_unique_id: &str) -> Result<AdminMessage> {
        Ok(AdminMessage::CreateInCacheInstance {
            kind,
            cluster_unique_id: required(CommandKind::CreateInCacheInstance, cluster_unique_id)?,
        })
    }

    /// build from a command and its ordered arguments; arity is exact.
    pub fn from_parts(command: CommandKind, arguments: Vec<String>) -> Result<AdminMessage> {
        if arguments.len() != command.arity() {
            return Err(CacheError::MalformedArguments {
                command: command.to_string(),
                expected: command.arity(),
                found: arguments.len(),
            });
        }

        match command {
            CommandKind::RemoveListener => {
                AdminMessage::remove_listener(&arguments[0], &arguments[1])
            }
            CommandKind::ShutdownInstance => AdminMessage::shutdown(&arguments[0]),
            CommandKind::CreateInCacheInstance => {
                let kind = ObjectKind::from_str(&arguments[0])?;
                AdminMessage::create_instance(kind, &arguments[1])
            }
        }
    }

    pub fn command(&self) -> CommandKind {
        match self {
            AdminMessage::RemoveListener { .. } => CommandKind::RemoveListener,
            AdminMessage::ShutdownInstance { .. } => CommandKind::ShutdownInstance,
            AdminMessage::CreateInCacheInstance { .. } => CommandKind::CreateInCacheInstance,
        }
    }

    pub fn arguments(&self) -> Vec<String> {
        match self {
            AdminMessage::RemoveListener {
                object_id,
                listener_id,
            } => vec![object_id.clone(), listener_id.clone()],
            AdminMessage::ShutdownInstance { target_node_id } => vec![target_node_id.clone()],
            AdminMessage::CreateInCacheInstance {
                kind,
                cluster_unique_id,
            } => vec![kind.to_string(), cluster_unique_id.clone()],
        }
    }

    pub fn to_wire(&self) -> Result<String> {
        let wire = WireMessage {
            command: self.command().to_string(),
            arguments: self.arguments(),
        };

        Ok(serde_json::to_string(&wire)?)
    }

    /// decode a message read from the admin topic.  an unknown command name is
    /// reported as `UnsupportedCommand`.
    pub fn from_wire(text: &str) -> Result<AdminMessage> {
        let wire: WireMessage = serde_json::from_str(text)?;
        let command = CommandKind::from_str(&wire.command)?;
        AdminMessage::from_parts(command, wire.arguments)
    }
}

impl fmt::Display for AdminMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.command(), self.arguments())
    }
}
