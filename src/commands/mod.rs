//! CLI commands

use std::path::PathBuf;

use crate::{kubeconfig, Result};

pub mod create;
pub mod delete;
pub mod get;

/// Resolve where the admin kubeconfig goes, reading the home directory here
/// so nothing below the CLI touches process environment.
pub fn kubeconfig_destination(explicit: Option<&std::path::Path>) -> Result<PathBuf> {
    let home = dirs::home_dir();
    kubeconfig::resolve_destination(explicit, home.as_deref())
}
