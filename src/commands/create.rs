//! `kinc create cluster` - provision a local cluster
//!
//! # Usage
//!
//! ```bash
//! # Single control-plane cluster named "kind"
//! kinc create cluster
//!
//! # Named cluster from a kind config file, waiting up to 5m for readiness
//! kinc create cluster --name demo --config cluster.yaml --wait 5m
//!
//! # Remove the node if provisioning fails
//! kinc create cluster --retain=false
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Subcommand};
use tracing::info;

use crate::config::{self, Overrides};
use crate::progress::Spinner;
use crate::provision::{CreateOptions, Provisioner};
use crate::runtime::ProcessRunner;
use crate::{wait, Result};

/// Create resources
#[derive(Subcommand, Debug)]
pub enum CreateCommands {
    /// Creates a local Kubernetes cluster using container runtime 'nodes'
    Cluster(CreateClusterArgs),
}

#[derive(Args, Debug)]
pub struct CreateClusterArgs {
    /// Cluster name, overrides the name in the config file
    #[arg(short = 'n', long, env = "KIND_CLUSTER_NAME")]
    pub name: Option<String>,

    /// Path to a kind config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Node image to use for booting the cluster
    #[arg(long)]
    pub image: Option<String>,

    /// Kubeconfig path to write instead of $HOME/.kube/config
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Retain nodes for debugging when cluster creation fails
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub retain: bool,

    /// Wait for the control-plane node to be ready (e.g. 30s, 5m; 0 disables)
    #[arg(long, default_value = "0s", value_parser = parse_wait)]
    pub wait: Duration,
}

fn parse_wait(s: &str) -> std::result::Result<Duration, String> {
    wait::parse_duration(s).map_err(|e| e.to_string())
}

/// Run the create cluster command
pub async fn run(command: CreateCommands) -> Result<()> {
    match command {
        CreateCommands::Cluster(args) => create_cluster(args).await,
    }
}

async fn create_cluster(args: CreateClusterArgs) -> Result<()> {
    let spec = config::resolve(
        args.config.as_deref(),
        &Overrides {
            name: args.name.as_deref(),
            image: args.image.as_deref(),
        },
    )?;

    let options = CreateOptions {
        kubeconfig_path: super::kubeconfig_destination(args.kubeconfig.as_deref())?,
        retain: args.retain,
        wait: args.wait,
    };
    info!(
        cluster = %spec.name,
        kubeconfig = %options.kubeconfig_path.display(),
        retain = options.retain,
        "Resolved cluster spec"
    );

    println!("Creating cluster '{}' ...", spec.name);
    let report = Provisioner::new(ProcessRunner::new(), Spinner::new())
        .create(&spec, &options)
        .await?;

    println!();
    println!(
        "Kubeconfig for cluster '{}' written to {}",
        spec.name,
        report.kubeconfig_path.display()
    );
    println!("You can now use your cluster with:");
    println!();
    println!("kubectl cluster-info");
    Ok(())
}
