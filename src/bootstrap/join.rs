//! Join phase: enroll one secondary node using the primary's token

use tracing::info;

use super::command::join_command;
use super::token::JoinToken;
use crate::cluster::ExtraOptions;
use crate::node::Node;
use crate::remote::{ConnectTarget, RemoteExecutor};
use crate::Result;

/// Run the enrollment installer on a secondary node.
///
/// Additional masters join as servers, workers as agents. No retry.
pub async fn join_node(
    executor: &dyn RemoteExecutor,
    target: &ConnectTarget,
    node: &Node,
    api_address: &str,
    token: &JoinToken,
    extra: &ExtraOptions,
) -> Result<()> {
    info!(node = %node.name, role = %node.role, "joining node");

    let command = join_command(node.role, api_address, token, extra);

    let mut session = executor.connect(target).await?;
    let result = session.run(&command).await;
    session.close().await;

    result
}
