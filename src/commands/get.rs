//! `kinc get` - inspect clusters

use clap::{Args, Subcommand};
use tokio::io::AsyncWriteExt;

use crate::config::DEFAULT_CLUSTER_NAME;
use crate::node::Node;
use crate::runtime::ProcessRunner;
use crate::{kubeconfig, teardown, Result};

/// Get resources
#[derive(Subcommand, Debug)]
pub enum GetCommands {
    /// Lists existing clusters
    Clusters,
    /// Prints cluster kubeconfig
    Kubeconfig(ClusterNameArgs),
    /// Lists node containers of a cluster
    Nodes(ClusterNameArgs),
}

#[derive(Args, Debug)]
pub struct ClusterNameArgs {
    /// The cluster context name
    #[arg(short = 'n', long, env = "KIND_CLUSTER_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    pub name: String,
}

/// Run the get command
pub async fn run(command: GetCommands) -> Result<()> {
    let runner = ProcessRunner::new();
    match command {
        GetCommands::Clusters => {
            let clusters = teardown::list_clusters(&runner).await?;
            if clusters.is_empty() {
                eprintln!("No kind clusters found.");
            }
            for cluster in clusters {
                println!("{}", cluster);
            }
        }
        GetCommands::Kubeconfig(args) => {
            let bytes = kubeconfig::export(&runner, &Node::control_plane(&args.name)).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&bytes).await?;
            stdout.flush().await?;
        }
        GetCommands::Nodes(args) => {
            let nodes = teardown::list_nodes(&runner, &args.name).await?;
            if nodes.is_empty() {
                eprintln!("No kind nodes found for cluster \"{}\".", args.name);
            }
            for node in nodes {
                println!("{}", node);
            }
        }
    }
    Ok(())
}
