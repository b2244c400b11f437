//! Cluster configuration resolution.
//!
//! Builds a [`ClusterSpec`] from three layers, highest priority first:
//! 1. Explicit invocation overrides (`--name`, `--image`)
//! 2. An optional kind-style config document (`--config`)
//! 3. Built-in defaults
//!
//! Only structural parsing is done on the document; CIDR strings and the
//! like are passed through untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::node::{Node, NodeRole};
use crate::{Error, Result};

/// Node image used when neither `--image` nor the config document names one
pub const DEFAULT_NODE_IMAGE: &str = "kindest/node:v1.34.0";

/// Pod subnet used when the config document does not set one
pub const DEFAULT_POD_SUBNET: &str = "10.244.0.0/16";

/// Cluster name used when none is given anywhere
pub const DEFAULT_CLUSTER_NAME: &str = "kind";

pub const DEFAULT_KIND: &str = "Cluster";
pub const DEFAULT_API_VERSION: &str = "kind.x-k8s.io/v1alpha4";

/// The declarative config document as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    pub kind: Option<String>,
    pub api_version: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub networking: NetworkingConfig,
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkingConfig {
    #[serde(rename = "disableDefaultCNI")]
    pub disable_default_cni: bool,
    pub kube_proxy_mode: Option<String>,
    pub pod_subnet: Option<String>,
    pub service_subnet: Option<String>,
    pub ip_family: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: String,
}

impl ClusterConfig {
    /// Parse a config document. An empty document yields all defaults.
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Read and parse the config document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(path, format!("failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
            .map_err(|e| Error::config(path, format!("failed to parse config file: {}", e)))
    }
}

/// Resolved cluster networking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Networking {
    pub pod_subnet: String,
    pub service_subnet: Option<String>,
    pub ip_family: Option<String>,
    pub kube_proxy_mode: Option<String>,
    pub disable_default_cni: bool,
}

/// A validated cluster description. Built once per invocation, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub name: String,
    pub node_image: String,
    pub kind: String,
    pub api_version: String,
    pub networking: Networking,
    /// Declared topology, never empty, exactly one control-plane
    pub nodes: Vec<NodeRole>,
}

impl ClusterSpec {
    /// The node that runs `kubeadm init`.
    pub fn control_plane(&self) -> Node {
        Node::control_plane(&self.name)
    }
}

/// Explicit overrides supplied by the invocation.
#[derive(Debug, Clone, Default)]
pub struct Overrides<'a> {
    pub name: Option<&'a str>,
    pub image: Option<&'a str>,
}

/// Load the optional config document and resolve it against `overrides`.
pub fn resolve(config_path: Option<&Path>, overrides: &Overrides<'_>) -> Result<ClusterSpec> {
    let document = match config_path {
        Some(path) => {
            debug!(path = %path.display(), "Loading cluster config");
            Some(ClusterConfig::load(path)?)
        }
        None => None,
    };
    resolve_document(document, overrides)
}

/// Merge a parsed (or absent) document with overrides and defaults.
pub fn resolve_document(
    document: Option<ClusterConfig>,
    overrides: &Overrides<'_>,
) -> Result<ClusterSpec> {
    let document = document.unwrap_or_default();

    let name = overrides
        .name
        .map(str::to_string)
        .or(document.name)
        .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());
    if name.trim().is_empty() {
        return Err(Error::validation("cluster name must not be empty"));
    }

    let node_image = overrides
        .image
        .map(str::to_string)
        .or(document.image)
        .unwrap_or_else(|| DEFAULT_NODE_IMAGE.to_string());

    let networking = Networking {
        pod_subnet: document
            .networking
            .pod_subnet
            .unwrap_or_else(|| DEFAULT_POD_SUBNET.to_string()),
        service_subnet: document.networking.service_subnet,
        ip_family: document.networking.ip_family,
        kube_proxy_mode: document.networking.kube_proxy_mode,
        disable_default_cni: document.networking.disable_default_cni,
    };

    let nodes = resolve_topology(&document.nodes)?;

    Ok(ClusterSpec {
        name,
        node_image,
        kind: document.kind.unwrap_or_else(|| DEFAULT_KIND.to_string()),
        api_version: document
            .api_version
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        networking,
        nodes,
    })
}

/// Parse declared roles, failing fast on anything that cannot be provisioned.
fn resolve_topology(nodes: &[NodeConfig]) -> Result<Vec<NodeRole>> {
    if nodes.is_empty() {
        return Ok(vec![NodeRole::ControlPlane]);
    }

    let roles = nodes
        .iter()
        .map(|n| n.role.parse::<NodeRole>())
        .collect::<Result<Vec<_>>>()?;

    if let Some(role) = roles.iter().find(|r| !r.is_supported()) {
        return Err(Error::validation(format!(
            "node role '{}' is not supported yet, only a single control-plane node can be provisioned",
            role
        )));
    }

    let control_planes = roles
        .iter()
        .filter(|r| **r == NodeRole::ControlPlane)
        .count();
    if control_planes != 1 {
        return Err(Error::validation(format!(
            "exactly one control-plane node is supported, found {}",
            control_planes
        )));
    }

    Ok(roles)
}
