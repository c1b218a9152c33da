use anyhow::Result;
use log::*;

use super::cache_node::CacheNode;
use crate::config::NodeConfig;
use crate::grid::Grid;
use crate::status::NodeStatus;

/// starts and stops a group of nodes on one grid
pub struct Supervisor {
    grid: Grid,
    pub nodes: Vec<CacheNode>,
}

impl Supervisor {
    pub fn new(grid: Grid) -> Supervisor {
        Supervisor {
            grid,
            nodes: vec![],
        }
    }

    /// start one node per config, in order
    pub async fn start(grid: Grid, configs: Vec<NodeConfig>) -> Result<Supervisor> {
        let mut supervisor = Supervisor::new(grid);
        for config in configs.into_iter() {
            supervisor.start_node(config).await?;
        }

        Ok(supervisor)
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub async fn start_node(&mut self, config: NodeConfig) -> Result<&CacheNode> {
        let node = CacheNode::start(&self.grid, config).await?;
        self.nodes.push(node);

        let idx = self.nodes.len() - 1;
        Ok(&self.nodes[idx])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub async fn status(&self) -> Vec<NodeStatus> {
        let mut list = vec![];
        for node in self.nodes.iter() {
            match node.status().await {
                Ok(status) => list.push(status),
                Err(e) => error!("no status from node {}: {}", node.id(), e),
            }
        }

        list
    }

    /// stop every node; the first failure is returned after all were tried
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for node in self.nodes.iter() {
            if let Err(e) = node.stop().await {
                error!("node {} did not stop cleanly: {}", node.id(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::NodeState;

    #[test]
    fn new() {
        let supervisor = Supervisor::new(Grid::new("incache"));
        assert_eq!(supervisor.len(), 0);
        assert!(supervisor.is_empty());
    }

    #[test]
    fn start_and_shutdown() {
        async_std::task::block_on(async move {
            let grid = Grid::new("incache");
            let supervisor = Supervisor::start(
                grid.clone(),
                vec![NodeConfig::member("incache"), NodeConfig::client("incache")],
            )
            .await
            .expect("should start both nodes");

            assert_eq!(supervisor.len(), 2);
            assert_eq!(grid.connected_nodes().len(), 2);

            supervisor.shutdown().await.unwrap();
            for status in supervisor.status().await {
                assert_eq!(status.state, NodeState::Shutdown);
            }
            assert!(supervisor.grid().connected_nodes().is_empty());
        });
    }
}
