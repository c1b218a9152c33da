/// node configuration
///
/// Read from json; any field left out takes its default.  Validation runs
/// before a node joins the grid.
///
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{CacheError, Result};

pub const DEFAULT_ADMIN_TOPIC: &str = "__incache_admin";
pub const DEFAULT_INDEX_MAP: &str = "__incache_listener_ids";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Member,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub cluster_name: String,
    pub role: NodeRole,
    pub bind_address: String,
    pub port: u32,
    /// comma separated host:port list
    pub peers: String,
    pub admin_topic: String,
    pub index_map: String,
    pub operation_timeout_ms: u64,
    /// announce SHUTDOWN_INSTANCE for self on stop
    pub broadcast_shutdown: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            cluster_name: "incache".to_string(),
            role: NodeRole::Member,
            bind_address: "127.0.0.1".to_string(),
            port: 5701,
            peers: "127.0.0.1:5701".to_string(),
            admin_topic: DEFAULT_ADMIN_TOPIC.to_string(),
            index_map: DEFAULT_INDEX_MAP.to_string(),
            operation_timeout_ms: 5_000,
            broadcast_shutdown: true,
        }
    }
}

impl NodeConfig {
    pub fn member(cluster_name: &str) -> NodeConfig {
        NodeConfig {
            cluster_name: cluster_name.to_string(),
            ..NodeConfig::default()
        }
    }

    pub fn client(cluster_name: &str) -> NodeConfig {
        NodeConfig {
            cluster_name: cluster_name.to_string(),
            role: NodeRole::Client,
            ..NodeConfig::default()
        }
    }

    pub fn from_json(text: &str) -> Result<NodeConfig> {
        let config: NodeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<NodeConfig> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("unable to read {}: {}", path.display(), e))
        })?;

        NodeConfig::from_json(&text)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn peer_addresses(&self) -> Vec<String> {
        self.peers.split(',').map(|p| p.trim().to_string()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        fn not_empty(name: &str, value: &str) -> Result<()> {
            if value.trim().is_empty() {
                Err(CacheError::Configuration(format!("{} must not be empty", name)))
            } else {
                Ok(())
            }
        }

        not_empty("cluster_name", &self.cluster_name)?;
        not_empty("bind_address", &self.bind_address)?;
        not_empty("admin_topic", &self.admin_topic)?;
        not_empty("index_map", &self.index_map)?;
        not_empty("peers", &self.peers)?;
        valid_port("port", self.port)?;

        if self.operation_timeout_ms == 0 {
            return Err(CacheError::Configuration(
                "operation_timeout_ms must be positive".to_string(),
            ));
        }

        for peer in self.peer_addresses() {
            let (host, port) = peer.rsplit_once(':').ok_or_else(|| {
                CacheError::Configuration(format!("peer {:?} is not host:port", peer))
            })?;
            not_empty("peer host", host)?;
            let port: u32 = port.parse().map_err(|_| {
                CacheError::Configuration(format!("peer {:?} has a non-numeric port", peer))
            })?;
            valid_port("peer port", port)?;
        }

        Ok(())
    }
}

fn valid_port(name: &str, port: u32) -> Result<()> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(CacheError::Configuration(format!(
            "{} {} is outside 1..=65535",
            name, port
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.role, NodeRole::Member);
        assert_eq!(config.admin_topic, DEFAULT_ADMIN_TOPIC);
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert_eq!(NodeConfig::client("c").role, NodeRole::Client);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config = NodeConfig::from_json(
            r#"{"cluster_name":"dev","role":"client","peers":"10.0.0.1:5701, 10.0.0.2:5702"}"#,
        )
        .unwrap();
        assert_eq!(config.cluster_name, "dev");
        assert_eq!(config.role, NodeRole::Client);
        assert_eq!(config.port, 5701);
        assert_eq!(
            config.peer_addresses(),
            vec!["10.0.0.1:5701", "10.0.0.2:5702"]
        );
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            NodeConfig {
                cluster_name: " ".to_string(),
                ..NodeConfig::default()
            },
            NodeConfig {
                port: 0,
                ..NodeConfig::default()
            },
            NodeConfig {
                port: 70_000,
                ..NodeConfig::default()
            },
            NodeConfig {
                peers: "10.0.0.1:5701,".to_string(),
                ..NodeConfig::default()
            },
            NodeConfig {
                peers: "10.0.0.1:http".to_string(),
                ..NodeConfig::default()
            },
            NodeConfig {
                peers: "10.0.0.1".to_string(),
                ..NodeConfig::default()
            },
            NodeConfig {
                operation_timeout_ms: 0,
                ..NodeConfig::default()
            },
        ];

        for config in bad.iter() {
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, CacheError::Configuration(_)),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn missing_file() {
        let err = NodeConfig::from_file("/no/such/incache.json").unwrap_err();
        assert!(err.to_string().contains("unable to read"));
    }
}
