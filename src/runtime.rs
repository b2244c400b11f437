//! Command execution against the container runtime.
//!
//! Every external tool is driven through the `container` CLI: runtime
//! operations directly, in-node tools (`kubeadm`, `kubectl`, `sysctl`) via
//! `container exec`. Execution goes through the [`CommandRunner`] trait so
//! the provisioning pipeline can be tested without a runtime.
//!
//! There are no retries and no timeouts here; each call blocks until the
//! process exits.

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecutionError;
use crate::node::{Node, ADMIN_KUBECONFIG, API_SERVER_PORT, CLUSTER_LABEL, NODE_MEMORY};

/// The container runtime CLI
pub const CONTAINER_CLI: &str = "container";

/// Number of trailing stderr lines kept in an [`ExecutionError`]
const STDERR_SNIPPET_LINES: usize = 20;

/// An external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCommand {
    program: String,
    args: Vec<String>,
}

impl ContainerCommand {
    /// A `container` invocation with the given arguments
    pub fn runtime<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: CONTAINER_CLI.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `container image pull <image>`
    pub fn image_pull(image: &str) -> Self {
        Self::runtime(["image", "pull", image])
    }

    /// Start `node` detached from `image`
    pub fn run_node(node: &Node, image: &str) -> Self {
        Self::runtime([
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            node.container_name().to_string(),
            "-m".to_string(),
            NODE_MEMORY.to_string(),
            "--disable-progress-updates".to_string(),
            "-e".to_string(),
            format!("KUBECONFIG={}", ADMIN_KUBECONFIG),
            "-l".to_string(),
            format!("{}={}", CLUSTER_LABEL, node.cluster()),
            "-p".to_string(),
            format!("127.0.0.1:{0}:{0}", API_SERVER_PORT),
            image.to_string(),
        ])
    }

    /// Run `argv` inside `node`
    pub fn exec<I, S>(node: &Node, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = vec!["exec".to_string(), node.container_name().to_string()];
        args.extend(argv.into_iter().map(Into::into));
        Self::runtime(args)
    }

    /// Run a shell pipeline inside `node` with `sh -euc`
    pub fn exec_shell(node: &Node, script: &str) -> Self {
        Self::exec(node, ["sh", "-euc", script])
    }

    /// `container rm -f <name>`
    pub fn force_remove(container_name: &str) -> Self {
        Self::runtime(["rm", "-f", container_name])
    }

    /// `container list --all --quiet`, one container name per line
    pub fn list_all() -> Self {
        Self::runtime(["list", "--all", "--quiet"])
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ContainerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a command's output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Forward stdout and stderr to the operator as they arrive
    Stream,
    /// Buffer output and hand it back to the caller
    Capture,
}

/// Output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout, empty in [`OutputMode::Stream`]
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Trait for executing external commands (allows mocking in tests)
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion. Nonzero exit and spawn failure are errors.
    async fn run(
        &self,
        command: &ContainerCommand,
        mode: OutputMode,
    ) -> Result<CommandOutput, ExecutionError>;
}

#[async_trait::async_trait]
impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    async fn run(
        &self,
        command: &ContainerCommand,
        mode: OutputMode,
    ) -> Result<CommandOutput, ExecutionError> {
        (**self).run(command, mode).await
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn capture(&self, command: &ContainerCommand) -> Result<CommandOutput, ExecutionError> {
        let output = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(command, e))?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ExecutionError {
                command: command.to_string(),
                exit_code: output.status.code(),
                stderr: tail_lines(&stderr, STDERR_SNIPPET_LINES),
            });
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr,
        })
    }

    async fn stream(&self, command: &ContainerCommand) -> Result<CommandOutput, ExecutionError> {
        let mut child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(command, e))?;

        // stderr is echoed live and its tail kept for the error report. Read
        // raw bytes so a non-UTF-8 line does not end the drain early.
        let mut tail = VecDeque::with_capacity(STDERR_SNIPPET_LINES);
        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(['\n', '\r'])
                            .to_string();
                        eprintln!("{}", line);
                        if tail.len() == STDERR_SNIPPET_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Err(e) => {
                        debug!(command = %command, error = %e, "Stopped reading stderr");
                        break;
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| spawn_error(command, e))?;
        let stderr = Vec::from(tail).join("\n");
        if !status.success() {
            return Err(ExecutionError {
                command: command.to_string(),
                exit_code: status.code(),
                stderr,
            });
        }

        Ok(CommandOutput {
            stdout: Vec::new(),
            stderr,
        })
    }
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &ContainerCommand,
        mode: OutputMode,
    ) -> Result<CommandOutput, ExecutionError> {
        debug!(command = %command, ?mode, "Running command");
        match mode {
            OutputMode::Capture => self.capture(command).await,
            OutputMode::Stream => self.stream(command).await,
        }
    }
}

fn spawn_error(command: &ContainerCommand, err: std::io::Error) -> ExecutionError {
    ExecutionError {
        command: command.to_string(),
        exit_code: None,
        stderr: err.to_string(),
    }
}

/// Keep the last `n` lines of `text`.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
