//! Cluster provisioning pipeline.
//!
//! Turns a [`ClusterSpec`] into a running, kubeadm-initialized control-plane
//! node:
//! 1. Pull the node image
//! 2. Start the control-plane node container
//! 3. Enable IP forwarding inside the node
//! 4. `kubeadm init`
//! 5. Remove the control-plane taint
//! 6. Install the default CNI (skipped when `disableDefaultCNI` is set)
//! 7. Install the default StorageClass
//! 8. Export the admin kubeconfig
//! 9. Optionally wait for the node to report Ready
//!
//! The first failing step aborts the pipeline. Completed steps are never
//! rolled back: re-running `kubeadm init` on a node is not safe, and the
//! node's state is what the operator needs to diagnose the failure. With
//! `retain = false` the node container is force-removed after a failure.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ClusterSpec;
use crate::kubeconfig;
use crate::node::{Lifecycle, Node, NodeState};
use crate::progress::Progress;
use crate::runtime::{CommandRunner, ContainerCommand, OutputMode};
use crate::teardown::{self, TeardownOutcome};
use crate::wait::{wait_with_timeout, PollResult};
use crate::{Error, Result};

/// Default CNI manifest shipped inside the node image
const DEFAULT_CNI_MANIFEST: &str = "/kind/manifests/default-cni.yaml";

/// Default StorageClass manifest shipped inside the node image
const DEFAULT_STORAGE_MANIFEST: &str = "/kind/manifests/default-storage.yaml";

/// Placeholder in the CNI manifest replaced with the pod subnet
const POD_SUBNET_PLACEHOLDER: &str = "{{ .PodSubnet }}";

const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/control-plane-";

/// Interval between readiness polls
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One stage of the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    PullImage,
    StartNode,
    ConfigureNode,
    InitControlPlane,
    RemoveTaint,
    InstallCni,
    InstallStorage,
    ExportKubeconfig,
    WaitReady,
}

impl Step {
    /// The fixed pipeline, in execution order.
    pub const PIPELINE: [Step; 8] = [
        Step::PullImage,
        Step::StartNode,
        Step::ConfigureNode,
        Step::InitControlPlane,
        Step::RemoveTaint,
        Step::InstallCni,
        Step::InstallStorage,
        Step::ExportKubeconfig,
    ];

    /// Progress label
    pub fn label(&self, spec: &ClusterSpec) -> String {
        match self {
            Step::PullImage => format!("Ensuring node image ({}) 🖼", spec.node_image),
            Step::StartNode => "Preparing nodes 📦".to_string(),
            Step::ConfigureNode => "Writing configuration 📜".to_string(),
            Step::InitControlPlane => "Starting control-plane 🕹️".to_string(),
            Step::RemoveTaint => "Removing control-plane taint 🧹".to_string(),
            Step::InstallCni => "Installing CNI 🔌".to_string(),
            Step::InstallStorage => "Installing StorageClass 💾".to_string(),
            Step::ExportKubeconfig => "Exporting kubeconfig 🔑".to_string(),
            Step::WaitReady => "Waiting for control-plane to be ready ⏳".to_string(),
        }
    }

    /// How the step's command output is handled. Only the image pull, which
    /// can take minutes, shows its output live.
    pub fn output_mode(&self) -> OutputMode {
        match self {
            Step::PullImage => OutputMode::Stream,
            _ => OutputMode::Capture,
        }
    }

    /// State the node is in once this step succeeds.
    pub fn reaches(&self) -> NodeState {
        match self {
            Step::PullImage => NodeState::ImagePulled,
            Step::StartNode => NodeState::Running,
            Step::ConfigureNode => NodeState::SysctlConfigured,
            Step::InitControlPlane => NodeState::ControlPlaneInitialized,
            Step::RemoveTaint => NodeState::TaintRemoved,
            Step::InstallCni => NodeState::CniInstalled,
            Step::InstallStorage => NodeState::StorageInstalled,
            Step::ExportKubeconfig => NodeState::KubeconfigExported,
            Step::WaitReady => NodeState::Ready,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::PullImage => "pull node image",
            Step::StartNode => "run node",
            Step::ConfigureNode => "write node config",
            Step::InitControlPlane => "init control-plane",
            Step::RemoveTaint => "remove control-plane taint",
            Step::InstallCni => "set up CNI",
            Step::InstallStorage => "set up StorageClass",
            Step::ExportKubeconfig => "export kubeconfig",
            Step::WaitReady => "wait for control-plane",
        };
        f.write_str(s)
    }
}

/// Per-invocation options for `create`.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Where the admin kubeconfig is written
    pub kubeconfig_path: PathBuf,
    /// Keep the node container after a failure
    pub retain: bool,
    /// How long to wait for the node to become Ready, zero to skip
    pub wait: Duration,
}

impl CreateOptions {
    pub fn new(kubeconfig_path: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig_path: kubeconfig_path.into(),
            retain: true,
            wait: Duration::ZERO,
        }
    }
}

/// Outcome of a successful `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningReport {
    pub node: Node,
    pub state: NodeState,
    pub kubeconfig_path: PathBuf,
    /// Steps executed, in order
    pub steps: Vec<Step>,
}

/// Steps `create` will run for `spec`, in order.
pub fn plan(spec: &ClusterSpec, options: &CreateOptions) -> Vec<Step> {
    let mut steps: Vec<Step> = Step::PIPELINE
        .into_iter()
        .filter(|s| !(*s == Step::InstallCni && spec.networking.disable_default_cni))
        .collect();
    if !options.wait.is_zero() {
        steps.push(Step::WaitReady);
    }
    steps
}

/// Drives the provisioning pipeline for one cluster.
pub struct Provisioner<R: CommandRunner, P: Progress> {
    runner: R,
    progress: P,
}

impl<R: CommandRunner, P: Progress> Provisioner<R, P> {
    pub fn new(runner: R, progress: P) -> Self {
        Self { runner, progress }
    }

    /// Provision the cluster described by `spec`.
    pub async fn create(
        &self,
        spec: &ClusterSpec,
        options: &CreateOptions,
    ) -> Result<ProvisioningReport> {
        let node = spec.control_plane();
        let steps = plan(spec, options);
        let mut lifecycle = Lifecycle::default();

        info!(cluster = %spec.name, image = %spec.node_image, "Creating cluster");

        for step in &steps {
            let label = step.label(spec);
            match step.output_mode() {
                OutputMode::Stream => self.progress.start_streaming(&label),
                OutputMode::Capture => self.progress.start(&label),
            }
            debug!(cluster = %spec.name, %step, "Running step");

            match self.execute(*step, spec, &node, options).await {
                Ok(()) => {
                    self.progress.stop(true);
                    lifecycle.advance(step.reaches());
                }
                Err(source) => {
                    self.progress.stop(false);
                    lifecycle.fail();
                    warn!(
                        cluster = %spec.name,
                        %step,
                        reached = %lifecycle.last_completed(),
                        "Provisioning failed"
                    );
                    self.handle_failure(&node, &lifecycle, options).await;
                    return Err(Error::Step {
                        step: *step,
                        reached: lifecycle.last_completed(),
                        source: Box::new(source),
                    });
                }
            }
        }

        info!(cluster = %spec.name, "Cluster ready");
        Ok(ProvisioningReport {
            node,
            state: lifecycle.last_completed(),
            kubeconfig_path: options.kubeconfig_path.clone(),
            steps,
        })
    }

    async fn handle_failure(&self, node: &Node, lifecycle: &Lifecycle, options: &CreateOptions) {
        if options.retain || !lifecycle.has_container() {
            if lifecycle.has_container() {
                info!(
                    node = %node.container_name(),
                    "Node retained for inspection, delete it explicitly when done"
                );
            }
            return;
        }

        info!(node = %node.container_name(), "Removing node after failure");
        if let TeardownOutcome::Failed(e) = teardown::delete_node(&self.runner, node).await {
            warn!(node = %node.container_name(), error = %e, "Node left behind");
        }
    }

    async fn execute(
        &self,
        step: Step,
        spec: &ClusterSpec,
        node: &Node,
        options: &CreateOptions,
    ) -> Result<()> {
        match step {
            Step::PullImage => {
                self.run(&ContainerCommand::image_pull(&spec.node_image), step.output_mode())
                    .await
            }
            Step::StartNode => {
                self.run(&ContainerCommand::run_node(node, &spec.node_image), OutputMode::Capture)
                    .await
            }
            Step::ConfigureNode => {
                self.exec(node, ["sysctl", "-w", "net.ipv4.ip_forward=1"])
                    .await
            }
            Step::InitControlPlane => {
                let cidr = format!("--pod-network-cidr={}", spec.networking.pod_subnet);
                self.exec(node, ["kubeadm", "init", cidr.as_str()]).await
            }
            Step::RemoveTaint => {
                self.exec(node, ["kubectl", "taint", "nodes", "--all", CONTROL_PLANE_TAINT])
                    .await
            }
            Step::InstallCni => {
                let script = cni_install_script(&spec.networking.pod_subnet);
                self.run(&ContainerCommand::exec_shell(node, &script), OutputMode::Capture)
                    .await
            }
            Step::InstallStorage => {
                self.run(
                    &ContainerCommand::exec_shell(node, &storage_install_script()),
                    OutputMode::Capture,
                )
                .await
            }
            Step::ExportKubeconfig => {
                let bytes = kubeconfig::export(&self.runner, node).await?;
                kubeconfig::write(&bytes, &options.kubeconfig_path).await
            }
            Step::WaitReady => self.wait_ready(node, options.wait).await,
        }
    }

    async fn run(&self, command: &ContainerCommand, mode: OutputMode) -> Result<()> {
        self.runner.run(command, mode).await?;
        Ok(())
    }

    async fn exec<const N: usize>(&self, node: &Node, argv: [&str; N]) -> Result<()> {
        self.run(&ContainerCommand::exec(node, argv), OutputMode::Capture)
            .await
    }

    /// Poll `kubectl get nodes` until every node reports Ready.
    async fn wait_ready(&self, node: &Node, timeout: Duration) -> Result<()> {
        let command = ContainerCommand::exec(node, ["kubectl", "get", "nodes", "--no-headers"]);
        wait_with_timeout(timeout, READY_POLL_INTERVAL, "control-plane to be ready", || {
            let command = command.clone();
            async move {
                let ready: PollResult<()> =
                    match self.runner.run(&command, OutputMode::Capture).await {
                        Ok(output) if all_nodes_ready(&output.stdout_lossy()) => Ok(Some(())),
                        // API server may still be coming up
                        Ok(_) | Err(_) => Ok(None),
                    };
                ready
            }
        })
        .await
    }
}

/// Shell pipeline rendering the bundled CNI manifest with `pod_subnet` and applying it.
pub fn cni_install_script(pod_subnet: &str) -> String {
    format!(
        "sed -e 's@{}@{}@' {} | kubectl apply -f -",
        POD_SUBNET_PLACEHOLDER, pod_subnet, DEFAULT_CNI_MANIFEST
    )
}

/// Shell pipeline applying the bundled StorageClass manifest.
pub fn storage_install_script() -> String {
    format!("cat {} | kubectl apply -f -", DEFAULT_STORAGE_MANIFEST)
}

/// Whether `kubectl get nodes --no-headers` lists at least one node and all are Ready.
fn all_nodes_ready(output: &str) -> bool {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty()).peekable();
    if lines.peek().is_none() {
        return false;
    }
    lines.all(|line| line.split_whitespace().nth(1) == Some("Ready"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_document, Overrides};
    use crate::error::ExecutionError;
    use crate::runtime::CommandOutput;
    use std::sync::Mutex;

    const ADMIN_CONF: &[u8] = b"apiVersion: v1\nkind: Config\nclusters: []\n";

    /// Records every command and fails the first one whose command line
    /// contains `fail_on`.
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<(String, OutputMode)>>,
        fail_on: Option<&'static str>,
        nodes_output: &'static str,
    }

    impl ScriptedRunner {
        fn failing_on(pattern: &'static str) -> Self {
            Self {
                fail_on: Some(pattern),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(c, _)| c.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            command: &ContainerCommand,
            mode: OutputMode,
        ) -> std::result::Result<CommandOutput, ExecutionError> {
            let line = command.to_string();
            self.calls.lock().unwrap().push((line.clone(), mode));

            if let Some(pattern) = self.fail_on {
                if line.contains(pattern) {
                    return Err(ExecutionError {
                        command: line,
                        exit_code: Some(1),
                        stderr: format!("{} exploded", pattern),
                    });
                }
            }

            let stdout = if line.ends_with("cat /etc/kubernetes/admin.conf") {
                ADMIN_CONF.to_vec()
            } else if line.contains("kubectl get nodes") {
                self.nodes_output.as_bytes().to_vec()
            } else {
                Vec::new()
            };
            Ok(CommandOutput {
                stdout,
                stderr: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl Progress for RecordingProgress {
        fn start(&self, label: &str) {
            self.events.lock().unwrap().push(format!("start {}", label));
        }

        fn start_streaming(&self, label: &str) {
            self.events.lock().unwrap().push(format!("stream {}", label));
        }

        fn stop(&self, succeeded: bool) {
            self.events.lock().unwrap().push(format!("stop {}", succeeded));
        }
    }

    fn demo_spec() -> ClusterSpec {
        resolve_document(
            None,
            &Overrides {
                name: Some("demo"),
                image: None,
            },
        )
        .unwrap()
    }

    fn options(dir: &tempfile::TempDir) -> CreateOptions {
        CreateOptions::new(dir.path().join(".kube").join("config"))
    }

    const EXPECTED: [&str; 8] = [
        "container image pull kindest/node:v1.34.0",
        "container run -d --name demo-control-plane",
        "container exec demo-control-plane sysctl -w net.ipv4.ip_forward=1",
        "container exec demo-control-plane kubeadm init --pod-network-cidr=10.244.0.0/16",
        "container exec demo-control-plane kubectl taint nodes --all node-role.kubernetes.io/control-plane-",
        "container exec demo-control-plane sh -euc sed -e 's@{{ .PodSubnet }}@10.244.0.0/16@' /kind/manifests/default-cni.yaml | kubectl apply -f -",
        "container exec demo-control-plane sh -euc cat /kind/manifests/default-storage.yaml | kubectl apply -f -",
        "container exec demo-control-plane cat /etc/kubernetes/admin.conf",
    ];

    #[tokio::test]
    async fn runs_all_steps_in_order_and_writes_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::default();
        let progress = RecordingProgress::default();
        let opts = options(&dir);

        let report = Provisioner::new(&runner, &progress)
            .create(&demo_spec(), &opts)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), EXPECTED.len());
        for (call, expected) in calls.iter().zip(EXPECTED) {
            assert!(call.starts_with(expected), "{} !~ {}", call, expected);
        }
        assert_eq!(report.state, NodeState::KubeconfigExported);
        assert_eq!(report.steps, Step::PIPELINE.to_vec());
        assert_eq!(std::fs::read(&opts.kubeconfig_path).unwrap(), ADMIN_CONF);
        assert_eq!(progress.events.lock().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn image_pull_is_not_animated() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::default();
        let progress = RecordingProgress::default();
        Provisioner::new(&runner, &progress)
            .create(&demo_spec(), &options(&dir))
            .await
            .unwrap();

        let events = progress.events.lock().unwrap();
        assert_eq!(events[0], "stream Ensuring node image (kindest/node:v1.34.0) 🖼");
        assert!(events[1..]
            .iter()
            .all(|e| e.starts_with("start ") || e.starts_with("stop ")));
    }

    #[tokio::test]
    async fn only_image_pull_streams() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::default();
        Provisioner::new(&runner, crate::progress::Silent)
            .create(&demo_spec(), &options(&dir))
            .await
            .unwrap();

        let modes: Vec<OutputMode> = runner.calls.lock().unwrap().iter().map(|(_, m)| *m).collect();
        assert_eq!(modes[0], OutputMode::Stream);
        assert!(modes[1..].iter().all(|m| *m == OutputMode::Capture));
    }

    #[tokio::test]
    async fn failing_step_aborts_the_rest() {
        let failures = [
            ("image pull", Step::PullImage, NodeState::NotCreated),
            ("run -d", Step::StartNode, NodeState::ImagePulled),
            ("sysctl", Step::ConfigureNode, NodeState::Running),
            ("kubeadm init", Step::InitControlPlane, NodeState::SysctlConfigured),
            ("taint", Step::RemoveTaint, NodeState::ControlPlaneInitialized),
            ("default-cni", Step::InstallCni, NodeState::TaintRemoved),
            ("default-storage", Step::InstallStorage, NodeState::CniInstalled),
            ("cat /etc/kubernetes/admin.conf", Step::ExportKubeconfig, NodeState::StorageInstalled),
        ];

        for (k, (pattern, step, reached)) in failures.into_iter().enumerate() {
            let dir = tempfile::tempdir().unwrap();
            let runner = ScriptedRunner::failing_on(pattern);
            let opts = options(&dir);

            let err = Provisioner::new(&runner, crate::progress::Silent)
                .create(&demo_spec(), &opts)
                .await
                .unwrap_err();

            assert_eq!(runner.calls().len(), k + 1, "step {} ran too many commands", step);
            match &err {
                Error::Step {
                    step: failed,
                    reached: r,
                    source,
                } => {
                    assert_eq!(*failed, step);
                    assert_eq!(*r, reached);
                    assert!(source.to_string().contains(&format!("{} exploded", pattern)));
                }
                other => panic!("unexpected error {:?}", other),
            }
            assert!(!opts.kubeconfig_path.exists());
        }
    }

    #[tokio::test]
    async fn failure_retains_node_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::failing_on("kubeadm init");
        Provisioner::new(&runner, crate::progress::Silent)
            .create(&demo_spec(), &options(&dir))
            .await
            .unwrap_err();
        assert!(!runner.calls().iter().any(|c| c.contains(" rm -f ")));
    }

    #[tokio::test]
    async fn failure_without_retain_removes_node() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::failing_on("kubeadm init");
        let mut opts = options(&dir);
        opts.retain = false;

        let err = Provisioner::new(&runner, crate::progress::Silent)
            .create(&demo_spec(), &opts)
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::InitControlPlane));
        let calls = runner.calls();
        assert_eq!(calls.last().unwrap(), "container rm -f demo-control-plane");
        assert!(!calls.iter().any(|c| c.contains("taint")));
    }

    #[tokio::test]
    async fn failure_before_node_exists_needs_no_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::failing_on("image pull");
        let mut opts = options(&dir);
        opts.retain = false;

        Provisioner::new(&runner, crate::progress::Silent)
            .create(&demo_spec(), &opts)
            .await
            .unwrap_err();
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn disabled_default_cni_skips_cni_step() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::default();
        let mut spec = demo_spec();
        spec.networking.disable_default_cni = true;

        let report = Provisioner::new(&runner, crate::progress::Silent)
            .create(&spec, &options(&dir))
            .await
            .unwrap();

        assert!(!report.steps.contains(&Step::InstallCni));
        assert!(!runner.calls().iter().any(|c| c.contains("default-cni")));
    }

    #[tokio::test]
    async fn custom_pod_subnet_reaches_kubeadm_and_cni() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::default();
        let mut spec = demo_spec();
        spec.networking.pod_subnet = "192.168.0.0/16".to_string();

        Provisioner::new(&runner, crate::progress::Silent)
            .create(&spec, &options(&dir))
            .await
            .unwrap();

        let calls = runner.calls();
        assert!(calls[3].ends_with("--pod-network-cidr=192.168.0.0/16"));
        assert!(calls[5].contains("@192.168.0.0/16@"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_polls_until_ready() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner {
            nodes_output: "demo-control-plane   Ready   control-plane   1m   v1.34.0\n",
            ..Default::default()
        };
        let mut opts = options(&dir);
        opts.wait = Duration::from_secs(60);

        let report = Provisioner::new(&runner, crate::progress::Silent)
            .create(&demo_spec(), &opts)
            .await
            .unwrap();

        assert_eq!(report.steps.last(), Some(&Step::WaitReady));
        assert_eq!(report.state, NodeState::Ready);
        assert!(runner.calls().last().unwrap().ends_with("kubectl get nodes --no-headers"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_never_ready() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner {
            nodes_output: "demo-control-plane   NotReady   control-plane   1m   v1.34.0\n",
            ..Default::default()
        };
        let mut opts = options(&dir);
        opts.wait = Duration::from_secs(10);

        let err = Provisioner::new(&runner, crate::progress::Silent)
            .create(&demo_spec(), &opts)
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(Step::WaitReady));
        // kubeconfig was exported before waiting
        assert!(opts.kubeconfig_path.exists());
    }

    #[test]
    fn readiness_parsing() {
        assert!(all_nodes_ready("a   Ready   control-plane   1m   v1.34.0\n"));
        assert!(!all_nodes_ready("a   NotReady   control-plane   1m   v1.34.0\n"));
        assert!(!all_nodes_ready(
            "a Ready control-plane 1m v1\nb NotReady <none> 1m v1\n"
        ));
        assert!(!all_nodes_ready(""));
    }

    #[test]
    fn cni_script_substitutes_subnet() {
        assert_eq!(
            cni_install_script("10.244.0.0/16"),
            "sed -e 's@{{ .PodSubnet }}@10.244.0.0/16@' /kind/manifests/default-cni.yaml | kubectl apply -f -"
        );
    }
}
