//! kinc - local Kubernetes clusters whose nodes are container runtime
//! instances, bootstrapped with kubeadm.

pub mod commands;
pub mod config;
pub mod error;
pub mod kubeconfig;
pub mod node;
pub mod progress;
pub mod provision;
pub mod runtime;
pub mod teardown;
pub mod wait;

pub use config::{ClusterSpec, Overrides};
pub use error::{Error, ExecutionError, Result};
pub use provision::{CreateOptions, Provisioner, ProvisioningReport, Step};
pub use runtime::{CommandRunner, ContainerCommand, OutputMode, ProcessRunner};

use clap::{Parser, Subcommand};

use commands::create::CreateCommands;
use commands::delete::DeleteCommands;
use commands::get::GetCommands;

/// kinc creates and manages local Kubernetes clusters using container 'nodes'
#[derive(Parser, Debug)]
#[command(name = "kinc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Creates one of [cluster]
    #[command(subcommand)]
    Create(CreateCommands),
    /// Deletes one of [cluster, clusters]
    #[command(subcommand)]
    Delete(DeleteCommands),
    /// Gets one of [clusters, kubeconfig, nodes]
    #[command(subcommand)]
    Get(GetCommands),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Create(cmd) => commands::create::run(cmd).await,
            Commands::Delete(cmd) => commands::delete::run(cmd).await,
            Commands::Get(cmd) => commands::get::run(cmd).await,
        }
    }
}
