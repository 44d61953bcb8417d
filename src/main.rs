//! k3s-bootstrap CLI

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use k3s_bootstrap::bootstrap::{Bootstrapper, K3sBootstrapper};
use k3s_bootstrap::cluster::Cluster;
use k3s_bootstrap::config::{BootstrapConfig, ClusterManifest};
use k3s_bootstrap::node::InventoryNodeManager;
use k3s_bootstrap::remote::SshExecutor;

/// Form k3s clusters on already-provisioned machines over SSH
#[derive(Parser, Debug)]
#[command(name = "k3s-bootstrap", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy k3s onto the machines listed in a cluster manifest
    ///
    /// Installs prerequisites on every node in parallel, forms the cluster on
    /// `<name>-master-1` and joins the remaining nodes one at a time.
    Deploy(DeployArgs),

    /// Download the admin kubeconfig from the primary master
    Kubeconfig(KubeconfigArgs),
}

/// Options shared by every subcommand
#[derive(Args, Debug)]
struct ManifestArgs {
    /// Path to the cluster manifest YAML
    #[arg(short = 'f', long = "config")]
    config_file: PathBuf,

    /// SSH user, overrides the manifest
    #[arg(long, env = "K3S_BOOTSTRAP_SSH_USER")]
    ssh_user: Option<String>,

    /// SSH port, overrides the manifest
    #[arg(long, env = "K3S_BOOTSTRAP_SSH_PORT")]
    ssh_port: Option<u16>,

    /// ssh client binary
    #[arg(long, env = "K3S_BOOTSTRAP_SSH", default_value = "ssh")]
    ssh_program: String,
}

/// Deploy arguments
#[derive(Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    manifest: ManifestArgs,

    /// Base URL of the prerequisite install script, overrides the manifest
    #[arg(long, env = "K3S_BOOTSTRAP_SCRIPT_BASE_URL")]
    script_base_url: Option<String>,

    /// Connection attempts per node during initialization (0 retries forever)
    #[arg(long)]
    init_attempts: Option<u32>,
}

/// Kubeconfig download arguments
#[derive(Args, Debug)]
struct KubeconfigArgs {
    #[command(flatten)]
    manifest: ManifestArgs,

    /// Directory the kubeconfig is written to
    #[arg(short = 'o', long = "output", default_value = ".")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy(args) => run_deploy(args).await,
        Commands::Kubeconfig(args) => run_kubeconfig(args).await,
    }
}

async fn run_deploy(args: DeployArgs) -> anyhow::Result<()> {
    let (cluster, mut config) = load(&args.manifest).await?;
    if let Some(url) = args.script_base_url {
        config.script_base_url = url;
    }
    if let Some(attempts) = args.init_attempts {
        config.init_retry.max_attempts = attempts;
    }

    let bootstrapper = build_bootstrapper(&cluster, config, &args.manifest.ssh_program);
    info!(
        cluster = %cluster.name,
        kind = bootstrapper.kind(),
        nodes = cluster.nodes.len(),
        "deploying cluster"
    );

    bootstrapper.prepare(&cluster, false).await?;
    bootstrapper.deploy(&cluster, None).await?;

    info!(cluster = %cluster.name, "cluster deployed");
    Ok(())
}

async fn run_kubeconfig(args: KubeconfigArgs) -> anyhow::Result<()> {
    let (cluster, config) = load(&args.manifest).await?;
    let bootstrapper = build_bootstrapper(&cluster, config, &args.manifest.ssh_program);

    let path = bootstrapper
        .download_kubeconfig(&cluster, &args.output_dir)
        .await?;
    println!("{}", path.display());
    Ok(())
}

async fn load(args: &ManifestArgs) -> anyhow::Result<(Cluster, BootstrapConfig)> {
    let manifest = ClusterManifest::load(&args.config_file)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", args.config_file.display(), e))?;

    let mut config = manifest.settings.clone();
    if let Some(user) = &args.ssh_user {
        config.ssh_user = user.clone();
    }
    if let Some(port) = args.ssh_port {
        config.ssh_port = port;
    }

    let cluster = manifest.into_cluster().await?;
    Ok((cluster, config))
}

fn build_bootstrapper(
    cluster: &Cluster,
    config: BootstrapConfig,
    ssh_program: &str,
) -> K3sBootstrapper {
    let node_manager = InventoryNodeManager::new(
        cluster.name.clone(),
        cluster.nodes.clone(),
        config.ssh_port,
        config.readiness.clone(),
    );
    let executor = SshExecutor::new().with_program(ssh_program);
    K3sBootstrapper::new(Arc::new(node_manager), Arc::new(executor), config)
}
