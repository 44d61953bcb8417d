//! Bootstrap phase: form the cluster on the primary and harvest its join token

use tracing::info;

use super::command::{server_install_command, token_read_command};
use super::token::JoinToken;
use crate::cluster::ExtraOptions;
use crate::remote::{ConnectTarget, RemoteExecutor, Session};
use crate::Result;

/// Install the k3s server on the primary and read back the join token.
///
/// `single_node` drops `--cluster-init`; nothing else changes. No retry is
/// applied: a failed bootstrap is fatal to the deploy.
pub async fn bootstrap_primary(
    executor: &dyn RemoteExecutor,
    target: &ConnectTarget,
    single_node: bool,
    extra: &ExtraOptions,
) -> Result<JoinToken> {
    info!(node = %target.host, single_node, "bootstrapping the first master node");

    let mut session = executor.connect(target).await?;
    let result = form_cluster(session.as_mut(), &target.address, single_node, extra).await;
    session.close().await;

    let token = result?;
    info!(node = %target.host, "primary node bootstrapped");
    Ok(token)
}

async fn form_cluster(
    session: &mut dyn Session,
    address: &str,
    single_node: bool,
    extra: &ExtraOptions,
) -> Result<JoinToken> {
    session
        .run(&server_install_command(address, single_node, extra))
        .await?;
    let raw = session.capture(&token_read_command()).await?;
    Ok(JoinToken::from_output(&raw))
}
