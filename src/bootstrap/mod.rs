//! k3s cluster bootstrap orchestration
//!
//! Turns a set of running, unconfigured machines into a joined k3s cluster.
//!
//! # Deploy Flow
//!
//! 1. Optional caller pre-check
//! 2. Wait for every node to be reported running
//! 3. Initialize all nodes in parallel (prerequisites, swap off)
//! 4. Form the cluster on `{cluster}-master-1` and read its join token
//! 5. Join every other node sequentially, stopping at the first failure
//!
//! There is no rollback. Nodes joined before a failure stay joined and are
//! listed in [`Error::Join`].

pub mod command;
mod init;
mod join;
mod primary;
mod token;

pub use init::initialize_nodes;
pub use join::join_node;
pub use primary::bootstrap_primary;
pub use token::JoinToken;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::cluster::{Cluster, ExtraOptions};
use crate::config::BootstrapConfig;
use crate::node::{primary_node_name, Node, NodeManager};
use crate::remote::{ConnectTarget, RemoteExecutor};
use crate::{Error, Result};

use command::{kubeconfig_read_command, url_host};

/// File name of the kubeconfig written by [`Bootstrapper::download_kubeconfig`]
pub const KUBECONFIG_FILE_NAME: &str = "admin.conf";

/// Caller-supplied check run before anything else
pub type PreCheck = dyn Fn() -> Result<()> + Send + Sync;

/// Progress of a deploy.
///
/// Phases only move forward; `Failed` is reachable from every non-terminal
/// phase and nothing is ever re-entered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeployPhase {
    /// Nothing started yet
    #[default]
    Init,
    /// Waiting for the node manager to report all nodes running
    WaitingReady,
    /// Prerequisite install on every node
    Initializing,
    /// Forming the cluster on the primary
    BootstrappingPrimary,
    /// Enrolling secondary nodes
    Joining,
    /// All nodes joined
    Done,
    /// Deploy aborted
    Failed,
}

impl DeployPhase {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::WaitingReady => write!(f, "WaitingReady"),
            Self::Initializing => write!(f, "Initializing"),
            Self::BootstrappingPrimary => write!(f, "BootstrappingPrimary"),
            Self::Joining => write!(f, "Joining"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Tracks and logs phase transitions of one deploy
#[derive(Debug)]
pub struct DeployProgress {
    cluster: String,
    phase: DeployPhase,
    failed_in: Option<DeployPhase>,
}

impl DeployProgress {
    /// Start tracking a deploy of `cluster`
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            phase: DeployPhase::Init,
            failed_in: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> DeployPhase {
        self.phase
    }

    /// Phase the deploy was in when it failed
    pub fn failed_in(&self) -> Option<DeployPhase> {
        self.failed_in
    }

    fn advance(&mut self, next: DeployPhase) {
        debug_assert!(
            !self.phase.is_terminal() && next > self.phase && next != DeployPhase::Failed,
            "invalid deploy transition {} -> {}",
            self.phase,
            next
        );
        info!(cluster = %self.cluster, from = %self.phase, to = %next, "deploy phase");
        self.phase = next;
    }

    fn fail(&mut self, err: &Error) {
        if self.phase.is_terminal() {
            return;
        }
        error!(cluster = %self.cluster, phase = %self.phase, error = %err, "deploy failed");
        self.failed_in = Some(self.phase);
        self.phase = DeployPhase::Failed;
    }
}

/// Cluster bootstrapper abstraction
#[async_trait]
pub trait Bootstrapper: Send + Sync {
    /// Form the cluster from its already-running nodes
    async fn deploy(&self, cluster: &Cluster, pre_check: Option<&PreCheck>) -> Result<()>;

    /// Fetch the admin kubeconfig from the primary into `dest_dir`
    async fn download_kubeconfig(&self, cluster: &Cluster, dest_dir: &Path) -> Result<PathBuf>;

    /// Provider-specific preparation before nodes are created
    async fn prepare(&self, cluster: &Cluster, force: bool) -> Result<()>;

    /// Distribution name
    fn kind(&self) -> &'static str;
}

/// Bootstraps k3s clusters over remote sessions
pub struct K3sBootstrapper {
    node_manager: Arc<dyn NodeManager>,
    executor: Arc<dyn RemoteExecutor>,
    config: BootstrapConfig,
}

impl K3sBootstrapper {
    /// Create a bootstrapper
    pub fn new(
        node_manager: Arc<dyn NodeManager>,
        executor: Arc<dyn RemoteExecutor>,
        config: BootstrapConfig,
    ) -> Self {
        Self {
            node_manager,
            executor,
            config,
        }
    }

    /// Deploy, recording phase transitions into `progress`
    pub async fn deploy_with_progress(
        &self,
        cluster: &Cluster,
        pre_check: Option<&PreCheck>,
        progress: &mut DeployProgress,
    ) -> Result<()> {
        let result = self.run_deploy(cluster, pre_check, progress).await;
        match &result {
            Ok(()) => progress.advance(DeployPhase::Done),
            Err(e) => progress.fail(e),
        }
        result
    }

    async fn run_deploy(
        &self,
        cluster: &Cluster,
        pre_check: Option<&PreCheck>,
        progress: &mut DeployProgress,
    ) -> Result<()> {
        if let Some(check) = pre_check {
            check()?;
        }

        let extra = cluster.spec.resolved_extra_options();

        progress.advance(DeployPhase::WaitingReady);
        self.wait_ready(cluster).await?;

        progress.advance(DeployPhase::Initializing);
        initialize_nodes(cluster, self.executor.clone(), &self.config).await?;

        progress.advance(DeployPhase::BootstrappingPrimary);
        let primary = self
            .node_manager
            .get_node(&primary_node_name(&cluster.name))
            .await?;
        let token = self
            .bootstrap(cluster, &primary, &extra)
            .await
            .map_err(|e| Error::Bootstrap {
                node: primary.name.clone(),
                source: Box::new(e),
            })?;

        progress.advance(DeployPhase::Joining);
        let nodes = self.node_manager.list_nodes(&cluster.name).await?;
        if nodes.is_empty() {
            return Err(Error::NoNodesAvailable {
                cluster: cluster.name.clone(),
            });
        }

        let secondaries: Vec<&Node> = nodes.iter().filter(|n| n.name != primary.name).collect();
        if !secondaries.is_empty() && token.is_empty() {
            return Err(Error::EmptyJoinToken {
                node: primary.name.clone(),
            });
        }

        let api_address = primary.address()?;
        let mut joined = Vec::with_capacity(secondaries.len());
        for node in secondaries {
            self.join(cluster, node, api_address, &token, &extra)
                .await
                .map_err(|e| Error::Join {
                    node: node.name.clone(),
                    joined: joined.clone(),
                    source: Box::new(e),
                })?;
            joined.push(node.name.clone());
        }

        info!(cluster = %cluster.name, joined = joined.len(), "cluster formed");
        Ok(())
    }

    async fn wait_ready(&self, cluster: &Cluster) -> Result<()> {
        self.node_manager
            .wait_nodes_running(&cluster.name, cluster.nodes.len())
            .await
            .map_err(|e| match e {
                Error::NotReady { .. } => e,
                other => Error::NotReady {
                    cluster: cluster.name.clone(),
                    message: other.to_string(),
                },
            })
    }

    async fn bootstrap(
        &self,
        cluster: &Cluster,
        primary: &Node,
        extra: &ExtraOptions,
    ) -> Result<JoinToken> {
        let target = self.target(cluster, primary)?;
        bootstrap_primary(
            self.executor.as_ref(),
            &target,
            cluster.is_single_node(),
            extra,
        )
        .await
    }

    async fn join(
        &self,
        cluster: &Cluster,
        node: &Node,
        api_address: &str,
        token: &JoinToken,
        extra: &ExtraOptions,
    ) -> Result<()> {
        let target = self.target(cluster, node)?;
        join_node(self.executor.as_ref(), &target, node, api_address, token, extra).await
    }

    fn target(&self, cluster: &Cluster, node: &Node) -> Result<ConnectTarget> {
        let spec = cluster.spec_for(node)?;
        ConnectTarget::for_node(node, spec, &self.config)
    }
}

#[async_trait]
impl Bootstrapper for K3sBootstrapper {
    async fn deploy(&self, cluster: &Cluster, pre_check: Option<&PreCheck>) -> Result<()> {
        let mut progress = DeployProgress::new(&cluster.name);
        self.deploy_with_progress(cluster, pre_check, &mut progress)
            .await
    }

    async fn download_kubeconfig(&self, cluster: &Cluster, dest_dir: &Path) -> Result<PathBuf> {
        let primary = self
            .node_manager
            .get_node(&primary_node_name(&cluster.name))
            .await?;
        let target = self.target(cluster, &primary)?;

        let mut session = self.executor.connect(&target).await?;
        let result = session.capture(&kubeconfig_read_command()).await;
        session.close().await;

        let kubeconfig = rewrite_server_address(&result?, &target.address);

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(KUBECONFIG_FILE_NAME);
        write_owner_only(&path, &kubeconfig).await?;

        info!(cluster = %cluster.name, path = %path.display(), "kubeconfig downloaded");
        Ok(path)
    }

    async fn prepare(&self, _cluster: &Cluster, _force: bool) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "k3s"
    }
}

/// Point the kubeconfig at the primary instead of the node-local loopback
fn rewrite_server_address(kubeconfig: &str, address: &str) -> String {
    let server = format!("https://{}:", url_host(address));
    kubeconfig
        .replace("https://127.0.0.1:", &server)
        .replace("https://[::1]:", &server)
        .replace("https://localhost:", &server)
}

async fn write_owner_only(path: &Path, content: &str) -> Result<()> {
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}
