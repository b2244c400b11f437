//! Kubeconfig export.
//!
//! The admin kubeconfig is read out of the control-plane node and written to
//! a local destination, replacing whatever was there. No merge, no backup.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ExecutionError;
use crate::node::{Node, ADMIN_KUBECONFIG};
use crate::runtime::{CommandRunner, ContainerCommand, OutputMode};
use crate::{Error, Result};

/// Fetch the admin kubeconfig bytes from `node`.
pub async fn export<R: CommandRunner + ?Sized>(
    runner: &R,
    node: &Node,
) -> std::result::Result<Vec<u8>, ExecutionError> {
    debug!(node = %node.container_name(), "Reading admin kubeconfig");
    let command = ContainerCommand::exec(node, ["cat", ADMIN_KUBECONFIG]);
    let output = runner.run(&command, OutputMode::Capture).await?;
    Ok(output.stdout)
}

/// Write `bytes` to `destination`, creating parent directories as needed.
pub async fn write(bytes: &[u8], destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(destination, bytes).await?;
    info!(path = %destination.display(), "Wrote kubeconfig");
    Ok(())
}

/// `<home>/.kube/config`
pub fn default_path(home: &Path) -> PathBuf {
    home.join(".kube").join("config")
}

/// Pick the kubeconfig destination: the explicit path if given, otherwise the
/// conventional location under `home`.
pub fn resolve_destination(explicit: Option<&Path>, home: Option<&Path>) -> Result<PathBuf> {
    match (explicit, home) {
        (Some(path), _) => Ok(path.to_path_buf()),
        (None, Some(home)) => Ok(default_path(home)),
        (None, None) => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not determine home directory",
        ))),
    }
}
