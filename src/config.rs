//! Bootstrap settings and the cluster manifest file
//!
//! A manifest describes the cluster to form:
//!
//! ```yaml
//! name: demo
//! version: v1.28.4+k3s1
//! privateKeyFile: id_ed25519
//! extraOptions:
//!   serverInstallOpts: --disable traefik
//! nodes:
//!   masters: ["10.0.0.1"]
//!   workers: ["10.0.0.2", "10.0.0.3"]
//! settings:
//!   sshUser: root
//!   initRetry:
//!     maxAttempts: 5
//! ```
//!
//! Node names are derived, never declared: the first master address
//! becomes `demo-master-1`, the bootstrap primary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cluster::{Cluster, ClusterSpec, ExtraOptions};
use crate::node::{Node, NodeRole};
use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Default location of the prerequisite install scripts
pub const DEFAULT_SCRIPT_BASE_URL: &str =
    "https://raw.githubusercontent.com/innobead/kubefire/master/scripts";

/// Runtime knobs for a deploy
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootstrapConfig {
    /// Login user on every node
    pub ssh_user: String,
    /// SSH port on every node
    pub ssh_port: u16,
    /// Base URL the prerequisite script is fetched from
    pub script_base_url: String,
    /// Backoff applied to session establishment during initialization
    pub init_retry: RetryConfig,
    /// Readiness polling budget
    pub readiness: ReadinessConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            ssh_user: "root".to_string(),
            ssh_port: 22,
            script_base_url: DEFAULT_SCRIPT_BASE_URL.to_string(),
            init_retry: RetryConfig::default(),
            readiness: ReadinessConfig::default(),
        }
    }
}

/// How long to wait for nodes to become reachable
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadinessConfig {
    /// Number of polls before giving up
    pub attempts: u32,
    /// Pause between polls
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Per-node probe timeout
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Durations written as (fractional) seconds
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Node addresses grouped by role, in index order
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeInventory {
    /// Server addresses; the first is the bootstrap primary
    pub masters: Vec<String>,
    /// Agent addresses
    pub workers: Vec<String>,
}

/// On-disk description of a cluster to form
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManifest {
    /// Cluster name
    pub name: String,
    /// k3s release to pin
    #[serde(default)]
    pub version: String,
    /// Private key used to log into the nodes, relative to the manifest
    pub private_key_file: PathBuf,
    /// Extra install options
    #[serde(default)]
    pub extra_options: ExtraOptions,
    /// Node addresses
    pub nodes: NodeInventory,
    /// Deploy settings
    #[serde(default)]
    pub settings: BootstrapConfig,
}

impl ClusterManifest {
    /// Parse a manifest from YAML and validate it
    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read and parse a manifest file.
    ///
    /// A relative `privateKeyFile` is resolved against the manifest's directory.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut manifest = Self::from_yaml(&content)?;
        if manifest.private_key_file.is_relative() {
            if let Some(dir) = path.parent() {
                manifest.private_key_file = dir.join(&manifest.private_key_file);
            }
        }
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("cluster name must not be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::validation(format!(
                "cluster name '{}' must contain only lowercase letters, digits and '-'",
                self.name
            )));
        }
        if self.nodes.masters.is_empty() {
            return Err(Error::validation("at least one master node is required"));
        }
        if let Some(addr) = self
            .nodes
            .masters
            .iter()
            .chain(&self.nodes.workers)
            .find(|a| a.trim().is_empty())
        {
            return Err(Error::validation(format!("invalid node address '{addr}'")));
        }
        Ok(())
    }

    /// Member nodes: masters first, then workers, each 1-indexed per role
    pub fn nodes(&self) -> Vec<Node> {
        let masters = self
            .nodes
            .masters
            .iter()
            .enumerate()
            .map(|(i, addr)| Node::new(&self.name, NodeRole::Master, i + 1, [addr.trim()]));
        let workers = self
            .nodes
            .workers
            .iter()
            .enumerate()
            .map(|(i, addr)| Node::new(&self.name, NodeRole::Worker, i + 1, [addr.trim()]));
        masters.chain(workers).collect()
    }

    /// Build the cluster, reading the private key from disk
    pub async fn into_cluster(self) -> Result<Cluster> {
        let private_key = tokio::fs::read_to_string(&self.private_key_file)
            .await
            .map_err(|e| {
                Error::validation(format!(
                    "failed to read private key {}: {}",
                    self.private_key_file.display(),
                    e
                ))
            })?;
        Ok(self.cluster_with_key(private_key))
    }

    fn cluster_with_key(&self, private_key: String) -> Cluster {
        Cluster {
            name: self.name.clone(),
            spec: ClusterSpec {
                version: self.version.clone(),
                private_key,
                extra_options: self.extra_options.clone(),
            },
            nodes: self.nodes(),
        }
    }
}
