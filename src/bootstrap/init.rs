//! Initialization phase: prerequisite install on every node in parallel
//!
//! One task per node. Every node is attempted regardless of the others, and
//! the phase only returns once every task has finished. Failures go through
//! a [`FailureCollector`] owned by the phase and are reported together.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::command::init_commands;
use crate::cluster::{k3s_version_env_vars, Cluster};
use crate::config::BootstrapConfig;
use crate::error::{InitFailures, NodeFailure};
use crate::remote::{CommandHook, ConnectTarget, RemoteCommand, RemoteExecutor};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Bounded buffer receiving at most one failure per node
pub(crate) struct FailureCollector {
    tx: mpsc::Sender<NodeFailure>,
    rx: mpsc::Receiver<NodeFailure>,
}

impl FailureCollector {
    pub(crate) fn with_capacity(nodes: usize) -> Self {
        let (tx, rx) = mpsc::channel(nodes.max(1));
        Self { tx, rx }
    }

    /// Handle for one node's task
    pub(crate) fn reporter(&self) -> FailureReporter {
        FailureReporter {
            tx: self.tx.clone(),
        }
    }

    /// Drain everything reported. Call after every task has finished.
    pub(crate) fn finish(self) -> InitFailures {
        let Self { tx, mut rx } = self;
        drop(tx);

        let mut reported = Vec::new();
        while let Ok(failure) = rx.try_recv() {
            reported.push(failure);
        }
        reported.sort_by(|a, b| a.node.cmp(&b.node));

        let mut failures = InitFailures::default();
        for NodeFailure { node, error } in reported {
            failures.push(node, error);
        }
        failures
    }
}

/// Write side of the collector. Consumed by the single report it makes.
pub(crate) struct FailureReporter {
    tx: mpsc::Sender<NodeFailure>,
}

impl FailureReporter {
    pub(crate) fn report(self, node: impl Into<String>, error: Error) {
        let failure = NodeFailure {
            node: node.into(),
            error,
        };
        if let Err(e) = self.tx.try_send(failure) {
            error!(error = %e, "failure collector rejected a node failure");
        }
    }
}

/// Run the prerequisite batch on every node of the cluster.
///
/// Returns [`Error::Init`] naming every failing node if any node failed.
pub async fn initialize_nodes(
    cluster: &Cluster,
    executor: Arc<dyn RemoteExecutor>,
    config: &BootstrapConfig,
) -> Result<()> {
    if cluster.nodes.is_empty() {
        return Err(Error::validation(format!(
            "cluster {} has no nodes to initialize",
            cluster.name
        )));
    }

    info!(cluster = %cluster.name, "initializing cluster");

    let commands = init_commands(
        &config.script_base_url,
        &k3s_version_env_vars(&cluster.spec.version),
    );
    let collector = FailureCollector::with_capacity(cluster.nodes.len());
    let mut tasks = Vec::with_capacity(cluster.nodes.len());

    for node in &cluster.nodes {
        let target = match cluster
            .spec_for(node)
            .and_then(|spec| ConnectTarget::for_node(node, spec, config))
        {
            Ok(target) => target,
            Err(e) => {
                collector.reporter().report(&node.name, e);
                continue;
            }
        };

        info!(node = %node.name, "initializing node");

        let reporter = collector.reporter();
        let executor = executor.clone();
        let commands = commands.clone();
        let retry = config.init_retry.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = init_node(executor.as_ref(), &target, &commands, &retry).await {
                reporter.report(target.host.clone(), e);
            }
        });
        tasks.push((node.name.clone(), handle));
    }

    info!("waiting for all nodes to finish initialization");

    for (node, handle) in tasks {
        if let Err(e) = handle.await {
            collector.reporter().report(
                &node,
                Error::command(&node, "node initialization", format!("task aborted: {e}")),
            );
        }
    }

    let failures = collector.finish();
    if !failures.is_empty() {
        error!(cluster = %cluster.name, failed = failures.len(), "node initialization failed");
    }
    failures.into_result()
}

/// Connect (retrying transient failures), run the batch once, always close
async fn init_node(
    executor: &dyn RemoteExecutor,
    target: &ConnectTarget,
    commands: &[RemoteCommand],
    retry: &RetryConfig,
) -> Result<()> {
    let operation = format!("connect to {}", target.host);
    let mut session = retry_with_backoff(retry, &operation, || executor.connect(target)).await?;

    let mut progress = StepLog {
        node: &target.host,
        step: 0,
        total: commands.len(),
    };
    let result = session.run_hooked(&mut progress, commands).await;
    session.close().await;

    if result.is_ok() {
        info!(node = %target.host, "node initialized");
    }
    result
}

/// Logs each prerequisite step as it runs
struct StepLog<'a> {
    node: &'a str,
    step: usize,
    total: usize,
}

impl CommandHook for StepLog<'_> {
    fn before(&mut self, command: &RemoteCommand) {
        self.step += 1;
        debug!(node = %self.node, step = self.step, total = self.total, command = %command, "init step");
    }

    fn after(&mut self, _command: &RemoteCommand, stdout: &str) {
        for line in stdout.lines() {
            debug!(node = %self.node, "    {}", line);
        }
    }
}
