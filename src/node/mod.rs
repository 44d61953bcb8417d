//! Cluster membership as seen by the bootstrapper
//!
//! Node lifecycle (creation, readiness, listing) is owned by a
//! [`NodeManager`]. The bootstrapper only reads membership through it.
//!
//! # Implementations
//!
//! - [`InventoryNodeManager`] - static inventory from a cluster manifest,
//!   readiness probed over TCP

mod inventory;

pub use inventory::InventoryNodeManager;

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::{Error, Result};

/// Role a node plays in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Server node; index 1 is the bootstrap primary, the rest join as servers
    Master,
    /// Agent node
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Conventional node name: `{cluster}-{role}-{index}`, index starting at 1
pub fn node_name(cluster: &str, role: NodeRole, index: usize) -> String {
    format!("{cluster}-{role}-{index}")
}

/// Name of the node that forms the cluster
pub fn primary_node_name(cluster: &str) -> String {
    node_name(cluster, NodeRole::Master, 1)
}

/// Observed state populated by the node manager
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStatus {
    /// Reachable addresses, preferred first
    pub addresses: Vec<String>,
}

/// A cluster member
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Conventional node name
    pub name: String,
    /// Role in the cluster
    pub role: NodeRole,
    /// Name of the owning cluster
    pub cluster: String,
    /// Observed state
    pub status: NodeStatus,
}

impl Node {
    /// Create a node with its conventional name
    pub fn new<I, S>(cluster: &str, role: NodeRole, index: usize, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: node_name(cluster, role, index),
            role,
            cluster: cluster.to_string(),
            status: NodeStatus {
                addresses: addresses.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Preferred address used for SSH and for the API endpoint
    pub fn address(&self) -> Result<&str> {
        self.status
            .addresses
            .first()
            .map(String::as_str)
            .ok_or_else(|| Error::validation(format!("node {} has no address", self.name)))
    }
}

/// Resolves cluster membership.
///
/// This trait abstracts the machine backend for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeManager: Send + Sync {
    /// Wait until `expected` nodes of the cluster are running.
    ///
    /// Fails with [`Error::NotReady`] once the implementation's attempt
    /// budget is spent.
    async fn wait_nodes_running(&self, cluster: &str, expected: usize) -> Result<()>;

    /// Fetch a node by name, [`Error::NodeNotFound`] if absent
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// List every node of a cluster in manager order
    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_cluster_role_index_convention() {
        assert_eq!(node_name("demo", NodeRole::Master, 1), "demo-master-1");
        assert_eq!(node_name("demo", NodeRole::Worker, 3), "demo-worker-3");
        assert_eq!(primary_node_name("prod"), "prod-master-1");
    }

    #[test]
    fn node_address_prefers_first_entry() {
        let node = Node::new("demo", NodeRole::Worker, 2, ["10.0.0.5", "fd00::5"]);
        assert_eq!(node.name, "demo-worker-2");
        assert_eq!(node.cluster, "demo");
        assert_eq!(node.address().unwrap(), "10.0.0.5");
        assert_eq!(node.role, NodeRole::Worker);
    }

    #[test]
    fn node_without_address_is_a_validation_error() {
        let node = Node::new("demo", NodeRole::Master, 1, Vec::<String>::new());
        let err = node.address().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("demo-master-1"));
    }

    #[test]
    fn roles_deserialize_lowercase() {
        let role: NodeRole = serde_yaml::from_str("master").unwrap();
        assert_eq!(role, NodeRole::Master);
        let role: NodeRole = serde_yaml::from_str("worker").unwrap();
        assert_eq!(role, NodeRole::Worker);
    }
}
