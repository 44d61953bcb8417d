//! Static node inventory with TCP readiness probing

use async_trait::async_trait;
use futures::future::join_all;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{Node, NodeManager};
use crate::config::ReadinessConfig;
use crate::{Error, Result};

/// Serves the nodes of one cluster from a fixed inventory.
///
/// A node counts as running once its SSH port accepts TCP connections.
#[derive(Clone, Debug)]
pub struct InventoryNodeManager {
    cluster: String,
    nodes: Vec<Node>,
    port: u16,
    readiness: ReadinessConfig,
}

impl InventoryNodeManager {
    /// Create a manager for `cluster` serving `nodes` in the given order
    pub fn new(cluster: impl Into<String>, nodes: Vec<Node>, port: u16, readiness: ReadinessConfig) -> Self {
        Self {
            cluster: cluster.into(),
            nodes,
            port,
            readiness,
        }
    }

    fn check_cluster(&self, cluster: &str) -> Result<()> {
        if cluster != self.cluster {
            return Err(Error::node_manager(format!(
                "unknown cluster {cluster}, inventory holds {}",
                self.cluster
            )));
        }
        Ok(())
    }

    async fn probe(&self, node: &Node) -> bool {
        let Ok(address) = node.address() else {
            return false;
        };
        let connect = TcpStream::connect((address, self.port));
        match tokio::time::timeout(self.readiness.probe_timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(node = %node.name, error = %e, "node not reachable yet");
                false
            }
            Err(_) => {
                debug!(node = %node.name, "readiness probe timed out");
                false
            }
        }
    }

    async fn unreachable_nodes(&self) -> Vec<&str> {
        let results = join_all(self.nodes.iter().map(|n| self.probe(n))).await;
        self.nodes
            .iter()
            .zip(results)
            .filter(|(_, ok)| !ok)
            .map(|(n, _)| n.name.as_str())
            .collect()
    }
}

#[async_trait]
impl NodeManager for InventoryNodeManager {
    async fn wait_nodes_running(&self, cluster: &str, expected: usize) -> Result<()> {
        self.check_cluster(cluster)?;

        let attempts = self.readiness.attempts.max(1);
        let mut message = String::new();

        for attempt in 1..=attempts {
            let unreachable = self.unreachable_nodes().await;
            let running = self.nodes.len() - unreachable.len();

            if running >= expected {
                info!(cluster, running, expected, "nodes are running");
                return Ok(());
            }

            message = format!("{running}/{expected} nodes running");
            if !unreachable.is_empty() {
                message.push_str(&format!(", unreachable: {}", unreachable.join(", ")));
            }
            info!(cluster, attempt, attempts, %message, "waiting for nodes");

            if attempt < attempts {
                tokio::time::sleep(self.readiness.interval).await;
            }
        }

        Err(Error::NotReady {
            cluster: cluster.to_string(),
            message,
        })
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound {
                name: name.to_string(),
            })
    }

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>> {
        self.check_cluster(cluster)?;
        Ok(self.nodes.clone())
    }
}
