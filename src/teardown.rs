//! Cluster teardown and enumeration.
//!
//! Deletion means "ensure absent": removing a cluster that does not exist
//! succeeds. Only the already-absent class of runtime errors is silently
//! absorbed; any other failure is logged as a warning and reported in the
//! outcome, but never returned as an error.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::error::ExecutionError;
use crate::node::{Node, NodeRole};
use crate::runtime::{CommandRunner, ContainerCommand, OutputMode};
use crate::Result;

/// What a delete actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    Deleted,
    AlreadyAbsent,
    /// The runtime refused for some other reason. Logged, not propagated.
    Failed(ExecutionError),
}

impl TeardownOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TeardownOutcome::Failed(_))
    }
}

/// Force-remove one node container.
pub async fn delete_node<R: CommandRunner + ?Sized>(runner: &R, node: &Node) -> TeardownOutcome {
    let command = ContainerCommand::force_remove(node.container_name());
    match runner.run(&command, OutputMode::Capture).await {
        Ok(_) => {
            info!(node = %node.container_name(), "Deleted node");
            TeardownOutcome::Deleted
        }
        Err(e) if e.is_not_found() => {
            debug!(node = %node.container_name(), "Node already absent");
            TeardownOutcome::AlreadyAbsent
        }
        Err(e) => {
            warn!(node = %node.container_name(), error = %e, "Failed to delete node");
            TeardownOutcome::Failed(e)
        }
    }
}

/// Delete the cluster `name`. Idempotent, never fails.
pub async fn delete_cluster<R: CommandRunner + ?Sized>(runner: &R, name: &str) -> TeardownOutcome {
    info!(cluster = %name, "Deleting cluster");
    delete_node(runner, &Node::control_plane(name)).await
}

/// Delete each of `names` in order.
pub async fn delete_clusters<R: CommandRunner + ?Sized>(
    runner: &R,
    names: &[String],
) -> Vec<(String, TeardownOutcome)> {
    let mut outcomes = Vec::with_capacity(names.len());
    for name in names {
        outcomes.push((name.clone(), delete_cluster(runner, name).await));
    }
    outcomes
}

/// Names of all clusters with a control-plane container, sorted.
pub async fn list_clusters<R: CommandRunner + ?Sized>(runner: &R) -> Result<Vec<String>> {
    let names = list_containers(runner).await?;
    Ok(clusters_from_containers(&names))
}

/// Node container names belonging to `cluster`, sorted.
pub async fn list_nodes<R: CommandRunner + ?Sized>(runner: &R, cluster: &str) -> Result<Vec<String>> {
    let mut nodes: Vec<String> = list_containers(runner)
        .await?
        .into_iter()
        .filter(|name| {
            Node::parse_container_name(name).is_some_and(|(owner, _)| owner == cluster)
        })
        .collect();
    nodes.sort();
    Ok(nodes)
}

async fn list_containers<R: CommandRunner + ?Sized>(runner: &R) -> Result<Vec<String>> {
    let output = runner
        .run(&ContainerCommand::list_all(), OutputMode::Capture)
        .await?;
    Ok(output
        .stdout_lossy()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn clusters_from_containers(names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter_map(|name| Node::parse_container_name(name))
        .filter(|(_, role)| *role == NodeRole::ControlPlane)
        .map(|(cluster, _)| cluster)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
