//! Node identity and lifecycle
//!
//! A node is one container instance acting as a cluster member. Its container
//! name is derived from the cluster name and role, e.g. `demo-control-plane`.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Label attached to every node container, valued with the cluster name
pub const CLUSTER_LABEL: &str = "io.x-k8s.kinc.cluster";

/// Memory limit given to each node container
pub const NODE_MEMORY: &str = "8G";

/// API server port, published on loopback only
pub const API_SERVER_PORT: u16 = 6443;

/// Admin kubeconfig inside the node, also exported as `KUBECONFIG` for in-node kubectl
pub const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

/// Role a node plays in the cluster topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl NodeRole {
    /// Roles this tool knows how to provision.
    pub const SUPPORTED: &'static [NodeRole] = &[NodeRole::ControlPlane];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::ControlPlane => "control-plane",
            NodeRole::Worker => "worker",
        }
    }

    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control-plane" => Ok(NodeRole::ControlPlane),
            "worker" => Ok(NodeRole::Worker),
            other => Err(Error::validation(format!(
                "unknown node role '{}', expected 'control-plane' or 'worker'",
                other
            ))),
        }
    }
}

/// A cluster member backed by a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    cluster: String,
    role: NodeRole,
    container_name: String,
}

impl Node {
    pub fn new(cluster: &str, role: NodeRole) -> Self {
        Self {
            cluster: cluster.to_string(),
            role,
            container_name: format!("{}-{}", cluster, role),
        }
    }

    /// The control-plane node of `cluster`
    pub fn control_plane(cluster: &str) -> Self {
        Self::new(cluster, NodeRole::ControlPlane)
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Recover the cluster and role from a container name.
    ///
    /// Worker names may carry an index suffix (`demo-worker2`), as kind does.
    pub fn parse_container_name(name: &str) -> Option<(String, NodeRole)> {
        let control_plane = format!("-{}", NodeRole::ControlPlane);
        if let Some(cluster) = name.strip_suffix(control_plane.as_str()) {
            if !cluster.is_empty() {
                return Some((cluster.to_string(), NodeRole::ControlPlane));
            }
        }

        let worker = format!("-{}", NodeRole::Worker);
        let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
        if let Some(cluster) = trimmed.strip_suffix(worker.as_str()) {
            if !cluster.is_empty() {
                return Some((cluster.to_string(), NodeRole::Worker));
            }
        }

        None
    }
}

/// Where a node is in the provisioning pipeline.
///
/// Ordering follows the pipeline, with `Failed` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeState {
    NotCreated,
    ImagePulled,
    Running,
    SysctlConfigured,
    ControlPlaneInitialized,
    TaintRemoved,
    CniInstalled,
    StorageInstalled,
    KubeconfigExported,
    Ready,
    Failed,
}

impl NodeState {
    /// Whether a container exists for the node in this state.
    pub fn has_container(&self) -> bool {
        *self >= NodeState::Running && *self != NodeState::Failed
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::NotCreated => "NotCreated",
            NodeState::ImagePulled => "ImagePulled",
            NodeState::Running => "Running",
            NodeState::SysctlConfigured => "SysctlConfigured",
            NodeState::ControlPlaneInitialized => "ControlPlaneInitialized",
            NodeState::TaintRemoved => "TaintRemoved",
            NodeState::CniInstalled => "CNIInstalled",
            NodeState::StorageInstalled => "StorageInstalled",
            NodeState::KubeconfigExported => "KubeconfigExported",
            NodeState::Ready => "Ready",
            NodeState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// In-memory lifecycle cursor for one node during a single `create`.
///
/// Never persisted: an interrupted process leaves the container in whatever
/// state the last completed step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    current: NodeState,
    last_completed: NodeState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            current: NodeState::NotCreated,
            last_completed: NodeState::NotCreated,
        }
    }
}

impl Lifecycle {
    pub fn current(&self) -> NodeState {
        self.current
    }

    /// Last state reached before any failure.
    pub fn last_completed(&self) -> NodeState {
        self.last_completed
    }

    pub fn advance(&mut self, to: NodeState) {
        debug_assert!(to > self.last_completed && to != NodeState::Failed);
        self.current = to;
        self.last_completed = to;
    }

    pub fn fail(&mut self) {
        self.current = NodeState::Failed;
    }

    /// Whether a container was left behind by the steps completed so far.
    pub fn has_container(&self) -> bool {
        self.last_completed.has_container()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_container_name() {
        let node = Node::control_plane("demo");
        assert_eq!(node.container_name(), "demo-control-plane");
        assert_eq!(node.cluster(), "demo");
        assert_eq!(node.role(), NodeRole::ControlPlane);
    }

    #[test]
    fn parse_container_names() {
        assert_eq!(
            Node::parse_container_name("demo-control-plane"),
            Some(("demo".to_string(), NodeRole::ControlPlane))
        );
        assert_eq!(
            Node::parse_container_name("my-lab-worker2"),
            Some(("my-lab".to_string(), NodeRole::Worker))
        );
        assert_eq!(Node::parse_container_name("-control-plane"), None);
        assert_eq!(Node::parse_container_name("buildkit"), None);
    }

    #[test]
    fn role_parsing_rejects_unknown_roles() {
        assert_eq!("control-plane".parse::<NodeRole>().unwrap(), NodeRole::ControlPlane);
        assert_eq!("worker".parse::<NodeRole>().unwrap(), NodeRole::Worker);
        assert!(matches!(
            "etcd".parse::<NodeRole>(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn only_control_plane_is_supported() {
        assert!(NodeRole::ControlPlane.is_supported());
        assert!(!NodeRole::Worker.is_supported());
    }

    #[test]
    fn lifecycle_keeps_last_completed_state_on_failure() {
        let mut lifecycle = Lifecycle::default();
        assert!(!lifecycle.has_container());

        lifecycle.advance(NodeState::ImagePulled);
        assert!(!lifecycle.has_container());

        lifecycle.advance(NodeState::Running);
        lifecycle.advance(NodeState::SysctlConfigured);
        lifecycle.fail();

        assert_eq!(lifecycle.current(), NodeState::Failed);
        assert_eq!(lifecycle.last_completed(), NodeState::SysctlConfigured);
        assert!(lifecycle.has_container());
    }

    #[test]
    fn state_display_uses_pipeline_names() {
        assert_eq!(NodeState::CniInstalled.to_string(), "CNIInstalled");
        assert_eq!(NodeState::Ready.to_string(), "Ready");
    }
}
