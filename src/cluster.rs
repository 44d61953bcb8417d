//! Logical cluster description: spec, extra install options, membership

use std::fmt;

use serde::Deserialize;

use crate::node::Node;
use crate::{Error, Result};

/// Environment variable that pins the k3s release installed on every node
pub const K3S_VERSION_ENV: &str = "INSTALL_K3S_VERSION";

/// A cluster to be formed from already-provisioned machines
#[derive(Clone, Debug)]
pub struct Cluster {
    /// Cluster name, the prefix of every node name
    pub name: String,
    /// Software version, login key, and install options
    pub spec: ClusterSpec,
    /// Member nodes in declaration order
    pub nodes: Vec<Node>,
}

impl Cluster {
    /// Resolve the spec that governs a node.
    ///
    /// Nodes only record the name of their owning cluster; this lookup
    /// replaces any stored pointer from node to spec.
    pub fn spec_for(&self, node: &Node) -> Result<&ClusterSpec> {
        if node.cluster != self.name {
            return Err(Error::validation(format!(
                "node {} belongs to cluster {}, not {}",
                node.name, node.cluster, self.name
            )));
        }
        Ok(&self.spec)
    }

    /// True when the cluster consists of exactly one node
    pub fn is_single_node(&self) -> bool {
        self.nodes.len() == 1
    }
}

/// Cluster-wide settings read while constructing remote commands
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// k3s release, e.g. `v1.28.4+k3s1`. Empty means the installer default.
    #[serde(default)]
    pub version: String,
    /// PEM-encoded private key used to log into every node
    #[serde(skip)]
    pub private_key: String,
    /// Free-form options appended to install invocations
    #[serde(default)]
    pub extra_options: ExtraOptions,
}

impl fmt::Debug for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSpec")
            .field("version", &self.version)
            .field("private_key", &"<redacted>")
            .field("extra_options", &self.extra_options)
            .finish()
    }
}

impl ClusterSpec {
    /// Extra options with the global part defaulted to version pinning.
    ///
    /// User-supplied global options replace the default rather than
    /// extending it.
    pub fn resolved_extra_options(&self) -> ExtraOptions {
        let mut options = self.extra_options.clone();
        if options.extra_options.trim().is_empty() {
            options.extra_options = k3s_version_env_vars(&self.version).to_string();
        }
        options
    }
}

/// Install options split by where they apply
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtraOptions {
    /// Appended to `INSTALL_K3S_EXEC` when the node runs as a server
    pub server_install_opts: String,
    /// Appended to `INSTALL_K3S_EXEC` when the node runs as an agent
    pub agent_install_opts: String,
    /// Prefixed to every installer invocation, e.g. version pinning
    pub extra_options: String,
}

/// Ordered `KEY=value` assignments rendered as a shell prefix
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvVars(Vec<(String, String)>);

impl EnvVars {
    /// Append an assignment
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// True when there are no assignments
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EnvVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Version pinning assignments for the k3s installer
pub fn k3s_version_env_vars(version: &str) -> EnvVars {
    let mut vars = EnvVars::default();
    let version = version.trim();
    if !version.is_empty() {
        vars.push(K3S_VERSION_ENV, version);
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeRole};

    fn cluster(version: &str) -> Cluster {
        Cluster {
            name: "demo".to_string(),
            spec: ClusterSpec {
                version: version.to_string(),
                private_key: "-----BEGIN KEY-----".to_string(),
                extra_options: ExtraOptions::default(),
            },
            nodes: vec![Node::new("demo", NodeRole::Master, 1, ["10.0.0.1"])],
        }
    }

    #[test]
    fn version_pinning_renders_as_env_prefix() {
        assert_eq!(
            k3s_version_env_vars("v1.28.4+k3s1").to_string(),
            "INSTALL_K3S_VERSION=v1.28.4+k3s1"
        );
        assert!(k3s_version_env_vars("").is_empty());
        assert!(k3s_version_env_vars("  ").is_empty());
    }

    #[test]
    fn multiple_env_vars_are_space_separated_in_order() {
        let mut vars = EnvVars::default();
        vars.push("A", "1");
        vars.push("B", "2");
        assert_eq!(vars.to_string(), "A=1 B=2");
    }

    #[test]
    fn global_options_default_to_version_pinning() {
        let c = cluster("v1.29.0+k3s1");
        let options = c.spec.resolved_extra_options();
        assert_eq!(options.extra_options, "INSTALL_K3S_VERSION=v1.29.0+k3s1");
        assert!(options.server_install_opts.is_empty());
    }

    #[test]
    fn user_global_options_replace_the_default() {
        let mut c = cluster("v1.29.0+k3s1");
        c.spec.extra_options.extra_options = "INSTALL_K3S_CHANNEL=stable".to_string();
        assert_eq!(
            c.spec.resolved_extra_options().extra_options,
            "INSTALL_K3S_CHANNEL=stable"
        );
    }

    #[test]
    fn spec_lookup_rejects_foreign_nodes() {
        let c = cluster("");
        assert!(c.spec_for(&c.nodes[0]).is_ok());

        let stranger = Node::new("other", NodeRole::Worker, 1, ["10.0.0.9"]);
        let err = c.spec_for(&stranger).unwrap_err();
        assert!(err.to_string().contains("belongs to cluster other"));
    }

    #[test]
    fn debug_output_hides_private_key() {
        let c = cluster("");
        let rendered = format!("{:?}", c.spec);
        assert!(!rendered.contains("BEGIN KEY"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn extra_options_deserialize_from_camel_case() {
        let options: ExtraOptions =
            serde_yaml::from_str("serverInstallOpts: --disable traefik\nagentInstallOpts: --node-label a=b")
                .unwrap();
        assert_eq!(options.server_install_opts, "--disable traefik");
        assert_eq!(options.agent_install_opts, "--node-label a=b");
        assert!(options.extra_options.is_empty());
    }
}
