//! Remote command construction for each bootstrap phase
//!
//! Everything here is pure string composition so the flag logic can be
//! tested without a remote transport.

use crate::cluster::{EnvVars, ExtraOptions};
use crate::node::NodeRole;
use crate::remote::RemoteCommand;

use super::token::JoinToken;

/// Port the k3s API server listens on
pub const K3S_API_PORT: u16 = 6443;
/// Installer script expected on every node after initialization
pub const K3S_INSTALLER: &str = "k3s-install.sh";
/// Prerequisite script fetched during initialization
pub const PREREQUISITES_SCRIPT: &str = "install-prerequisites-k3s.sh";
/// Join credential written by the primary's server
pub const JOIN_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
/// Admin kubeconfig written by the primary's server
pub const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// Starts embedded etcd so further servers can join
pub const CLUSTER_INIT_FLAG: &str = "--cluster-init";
/// Makes a joining node a server instead of an agent
pub const JOIN_AS_SERVER_FLAG: &str = "--server";

/// Host part of an `https://` URL; IPv6 literals get brackets
pub fn url_host(address: &str) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]")
    } else {
        address.to_string()
    }
}

/// URL of a script under `base_url`
pub fn script_url(base_url: &str, script: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), script)
}

/// Prerequisite batch run on every node
pub fn init_commands(script_base_url: &str, version_env: &EnvVars) -> Vec<RemoteCommand> {
    vec![
        RemoteCommand::new("swapoff -a"),
        RemoteCommand::new(format!(
            "curl -sSLO {}",
            script_url(script_base_url, PREREQUISITES_SCRIPT)
        )),
        RemoteCommand::new(format!("chmod +x {PREREQUISITES_SCRIPT}")),
        RemoteCommand::new(join_words([
            version_env.to_string().as_str(),
            format!("./{PREREQUISITES_SCRIPT}").as_str(),
        ])),
    ]
}

/// Installer invocation that forms the cluster on the primary
pub fn server_install_command(
    bind_address: &str,
    single_node: bool,
    extra: &ExtraOptions,
) -> RemoteCommand {
    let bind = format!("--bind-address={bind_address}");
    let mut flags = vec![bind.as_str()];
    if !single_node {
        flags.push(CLUSTER_INIT_FLAG);
    }
    push_opts(&mut flags, &extra.server_install_opts);

    RemoteCommand::new(installer_invocation(&flags, extra, &[]))
}

/// Reads the join credential on the primary
pub fn token_read_command() -> RemoteCommand {
    RemoteCommand::new(format!("cat {JOIN_TOKEN_PATH}"))
}

/// Reads the admin kubeconfig on the primary
pub fn kubeconfig_read_command() -> RemoteCommand {
    RemoteCommand::new(format!("cat {KUBECONFIG_PATH}"))
}

/// Installer invocation that enrolls a secondary node.
///
/// The token is redacted from the command's rendered form.
pub fn join_command(
    role: NodeRole,
    api_address: &str,
    token: &JoinToken,
    extra: &ExtraOptions,
) -> RemoteCommand {
    let mut flags = Vec::new();
    match role {
        NodeRole::Master => {
            flags.push(JOIN_AS_SERVER_FLAG);
            push_opts(&mut flags, &extra.server_install_opts);
        }
        NodeRole::Worker => push_opts(&mut flags, &extra.agent_install_opts),
    }

    let url = format!("K3S_URL=https://{}:{K3S_API_PORT}", url_host(api_address));
    let token_var = format!("K3S_TOKEN={}", token.expose());

    RemoteCommand::new(installer_invocation(&flags, extra, &[url.as_str(), token_var.as_str()]))
        .redact(token.expose())
}

fn push_opts<'a>(flags: &mut Vec<&'a str>, opts: &'a str) {
    let opts = opts.trim();
    if !opts.is_empty() {
        flags.push(opts);
    }
}

/// `INSTALL_K3S_EXEC="<flags>" <global opts> <assignments> k3s-install.sh`
fn installer_invocation(flags: &[&str], extra: &ExtraOptions, assignments: &[&str]) -> String {
    let exec = format!("INSTALL_K3S_EXEC=\"{}\"", flags.join(" "));
    let mut words = vec![exec.as_str(), extra.extra_options.trim()];
    words.extend_from_slice(assignments);
    words.push(K3S_INSTALLER);
    join_words(words)
}

fn join_words<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    words
        .into_iter()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
