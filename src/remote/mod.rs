//! Remote command execution on cluster nodes
//!
//! A [`RemoteExecutor`] opens one [`Session`] per node and phase. Sessions
//! are never shared and must be closed by whoever opened them, on success
//! and failure alike.
//!
//! Commands are wrapped in [`RemoteCommand`] so secrets embedded in a
//! command line (the join token) never reach logs or error messages.

mod ssh;

#[cfg(test)]
pub(crate) mod fake;

pub use ssh::SshExecutor;

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::cluster::ClusterSpec;
use crate::config::BootstrapConfig;
use crate::node::Node;
use crate::Result;

const REDACTED: &str = "<redacted>";

/// A shell command line to run on a node
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    line: String,
    display: String,
}

impl RemoteCommand {
    /// Wrap a command line
    pub fn new(line: impl Into<String>) -> Self {
        let line = line.into();
        Self {
            display: line.clone(),
            line,
        }
    }

    /// Mask every occurrence of `secret` in the rendered form
    pub fn redact(mut self, secret: &str) -> Self {
        if !secret.is_empty() {
            self.display = self.display.replace(secret, REDACTED);
        }
        self
    }

    /// The exact line sent to the node
    pub fn line(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteCommand").field(&self.display).finish()
    }
}

/// Where and how to log into a node
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Node name, used for error context
    pub host: String,
    /// Network address
    pub address: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub user: String,
    /// PEM-encoded private key
    pub private_key: String,
}

impl ConnectTarget {
    /// Target for a node, using the cluster's key and the deploy's login settings
    pub fn for_node(node: &Node, spec: &ClusterSpec, config: &BootstrapConfig) -> Result<Self> {
        Ok(Self {
            host: node.name.clone(),
            address: node.address()?.to_string(),
            port: config.ssh_port,
            user: config.ssh_user.clone(),
            private_key: spec.private_key.clone(),
        })
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("private_key", &REDACTED)
            .finish()
    }
}

/// Interception points around each command of a hooked run
pub trait CommandHook: Send {
    /// Called before the command is sent
    fn before(&mut self, _command: &RemoteCommand) {}

    /// Called with the command's standard output once it succeeded
    fn after(&mut self, _command: &RemoteCommand, _stdout: &str) {}
}

/// An open, authenticated session to one node
#[async_trait]
pub trait Session: Send {
    /// Run a command, failing on abnormal exit
    async fn run(&mut self, command: &RemoteCommand) -> Result<()>;

    /// Run a command and return its raw standard output
    async fn capture(&mut self, command: &RemoteCommand) -> Result<String>;

    /// Tear the session down. Never fails; teardown problems are logged.
    async fn close(&mut self);

    /// Run commands in order, stopping at the first failure, handing each
    /// command and its output to `hook`
    async fn run_hooked(
        &mut self,
        hook: &mut dyn CommandHook,
        commands: &[RemoteCommand],
    ) -> Result<()> {
        for command in commands {
            hook.before(command);
            let stdout = self.capture(command).await?;
            hook.after(command, &stdout);
        }
        Ok(())
    }
}

/// Opens sessions to nodes.
///
/// This trait abstracts the transport for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Establish a session, [`crate::Error::Connection`] on failure
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>>;
}
