//! Error types for cluster bootstrap operations

use std::fmt;

use thiserror::Error;

/// Main error type for bootstrap operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Caller-supplied pre-deploy check rejected the deploy
    #[error("pre-deploy check failed: {0}")]
    PreCheck(String),

    /// Nodes did not become ready within the attempt budget
    #[error("nodes of cluster {cluster} are not running: {message}")]
    NotReady {
        /// Cluster being waited on
        cluster: String,
        /// Last observed readiness state
        message: String,
    },

    /// A node looked up by name does not exist
    #[error("node not found: {name}")]
    NodeNotFound {
        /// Name that was looked up
        name: String,
    },

    /// Listing the cluster's nodes returned nothing
    #[error("no nodes available in cluster {cluster}")]
    NoNodesAvailable {
        /// Cluster that was listed
        cluster: String,
    },

    /// Remote session could not be established
    #[error("failed to connect to node {node} ({address}): {message}")]
    Connection {
        /// Node being connected to
        node: String,
        /// Address used for the connection
        address: String,
        /// Transport error message
        message: String,
    },

    /// A remote command exited abnormally
    #[error("command failed on node {node}: `{command}`: {message}")]
    Command {
        /// Node the command ran on
        node: String,
        /// Redacted rendering of the command
        command: String,
        /// Exit status and stderr
        message: String,
    },

    /// One or more nodes failed initialization
    #[error(transparent)]
    Init(#[from] InitFailures),

    /// Forming the cluster on the primary node failed
    #[error("failed to bootstrap primary node {node}: {source}")]
    Bootstrap {
        /// Primary node name
        node: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Enrolling a secondary node failed
    #[error("failed to join node {node}: {source}")]
    Join {
        /// Node whose join failed
        node: String,
        /// Nodes already joined before the failure; they stay joined
        joined: Vec<String>,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The primary produced an empty join token
    #[error("join token read from node {node} is empty")]
    EmptyJoinToken {
        /// Primary node name
        node: String,
    },

    /// Invalid cluster description or inconsistent membership
    #[error("validation error: {0}")]
    Validation(String),

    /// Node manager failure not covered by a more specific variant
    #[error("node manager error: {0}")]
    NodeManager(String),

    /// Local I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Cluster manifest could not be parsed
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a pre-check error with the given message
    pub fn pre_check(msg: impl Into<String>) -> Self {
        Self::PreCheck(msg.into())
    }

    /// Create a node manager error with the given message
    pub fn node_manager(msg: impl Into<String>) -> Self {
        Self::NodeManager(msg.into())
    }

    /// Create a connection error for a node
    pub fn connection(
        node: impl Into<String>,
        address: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            node: node.into(),
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a command error for a node
    pub fn command(
        node: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Command {
            node: node.into(),
            command: command.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from establishing a remote session
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// A single node's initialization failure
#[derive(Debug)]
pub struct NodeFailure {
    /// Failing node name
    pub node: String,
    /// What went wrong on that node
    pub error: Error,
}

/// Failures collected from every node during initialization
#[derive(Debug, Default)]
pub struct InitFailures {
    failures: Vec<NodeFailure>,
}

impl InitFailures {
    /// Record a failure for a node
    pub fn push(&mut self, node: impl Into<String>, error: Error) {
        self.failures.push(NodeFailure {
            node: node.into(),
            error,
        });
    }

    /// True when no node failed
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failing nodes
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Names of all failing nodes
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.node.as_str())
    }

    /// All recorded failures
    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate error
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Init(self))
        }
    }
}

impl fmt::Display for InitFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node(s) failed initialization:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n\t* failed on node ({}): {}", failure.node, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for InitFailures {}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation During Deploy
    // ==========================================================================

    /// Story: an aggregated init error names every failing node
    #[test]
    fn story_init_failures_name_every_failing_node() {
        let mut failures = InitFailures::default();
        failures.push(
            "demo-worker-1",
            Error::connection("demo-worker-1", "10.0.0.2", "connection refused"),
        );
        failures.push(
            "demo-worker-2",
            Error::command("demo-worker-2", "swapoff -a", "exit status 1"),
        );

        let err = failures.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 node(s) failed initialization"));
        assert!(msg.contains("demo-worker-1"));
        assert!(msg.contains("demo-worker-2"));
        assert!(msg.contains("connection refused"));

        match err {
            Error::Init(f) => {
                assert_eq!(f.len(), 2);
                let nodes: Vec<_> = f.nodes().collect();
                assert_eq!(nodes, vec!["demo-worker-1", "demo-worker-2"]);
            }
            other => panic!("expected Init, got {other:?}"),
        }
    }

    #[test]
    fn empty_init_failures_are_ok() {
        assert!(InitFailures::default().into_result().is_ok());
    }

    /// Story: join errors keep the partial-join outcome visible
    #[test]
    fn story_join_error_wraps_source_and_reports_joined_nodes() {
        let err = Error::Join {
            node: "demo-worker-2".to_string(),
            joined: vec!["demo-worker-1".to_string()],
            source: Box::new(Error::command(
                "demo-worker-2",
                "k3s-install.sh",
                "exit status 1",
            )),
        };
        assert!(err.to_string().contains("failed to join node demo-worker-2"));
        assert!(err.to_string().contains("exit status 1"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn connection_errors_are_classified() {
        assert!(Error::connection("n", "a", "m").is_connection());
        assert!(!Error::command("n", "c", "m").is_connection());
        assert!(!Error::validation("bad").is_connection());
    }

    #[test]
    fn fatal_phase_errors_have_clear_messages() {
        let err = Error::NotReady {
            cluster: "demo".to_string(),
            message: "1/3 nodes reachable".to_string(),
        };
        assert!(err.to_string().contains("demo"));
        assert!(err.to_string().contains("1/3"));

        let err = Error::NodeNotFound {
            name: "demo-master-1".to_string(),
        };
        assert_eq!(err.to_string(), "node not found: demo-master-1");

        let err = Error::NoNodesAvailable {
            cluster: "demo".to_string(),
        };
        assert_eq!(err.to_string(), "no nodes available in cluster demo");
    }
}
