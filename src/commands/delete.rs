//! `kinc delete` - remove clusters
//!
//! Deletion is idempotent, like `rm -f`: deleting a cluster that does not
//! exist succeeds. Failures to remove an existing node are reported as
//! warnings and never change the exit status.

use clap::{Args, Subcommand};
use tracing::warn;

use crate::config::DEFAULT_CLUSTER_NAME;
use crate::progress::{Progress, Spinner};
use crate::runtime::ProcessRunner;
use crate::teardown::{self, TeardownOutcome};
use crate::Result;

/// Delete resources
#[derive(Subcommand, Debug)]
pub enum DeleteCommands {
    /// Deletes a cluster
    Cluster(DeleteClusterArgs),
    /// Deletes one or more clusters
    Clusters(DeleteClustersArgs),
}

#[derive(Args, Debug)]
pub struct DeleteClusterArgs {
    /// The cluster name
    #[arg(short = 'n', long, env = "KIND_CLUSTER_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    pub name: String,
}

#[derive(Args, Debug)]
pub struct DeleteClustersArgs {
    /// Cluster names to delete
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub names: Vec<String>,

    /// Delete all clusters
    #[arg(short = 'A', long)]
    pub all: bool,
}

/// Run the delete command
pub async fn run(command: DeleteCommands) -> Result<()> {
    let runner = ProcessRunner::new();
    let names = match command {
        DeleteCommands::Cluster(args) => vec![args.name],
        DeleteCommands::Clusters(args) if args.all => {
            match teardown::list_clusters(&runner).await {
                Ok(names) => names,
                Err(e) => {
                    warn!(error = %e, "Failed to list clusters");
                    Vec::new()
                }
            }
        }
        DeleteCommands::Clusters(args) => args.names,
    };

    let spinner = Spinner::new();
    let mut outcomes = Vec::with_capacity(names.len());
    for name in names {
        spinner.start(&format!("Deleting cluster '{}' ...", name));
        let outcome = teardown::delete_cluster(&runner, &name).await;
        spinner.stop(!outcome.is_failed());
        if let TeardownOutcome::Failed(e) = &outcome {
            eprintln!("WARNING: cluster '{}' may not be fully deleted: {}", name, e);
        }
        outcomes.push((name, outcome));
    }

    if outcomes.len() > 1 {
        println!("Deleted clusters: {:?}", removed(&outcomes));
    }
    Ok(())
}

/// Names whose cluster is gone, whether deleted now or already absent.
fn removed(outcomes: &[(String, TeardownOutcome)]) -> Vec<&str> {
    outcomes
        .iter()
        .filter(|(_, outcome)| !outcome.is_failed())
        .map(|(name, _)| name.as_str())
        .collect()
}
