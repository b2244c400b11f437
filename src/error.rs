//! Error types for kinc

use std::path::PathBuf;

use thiserror::Error;

use crate::node::NodeState;
use crate::provision::Step;

/// kinc Result type
pub type Result<T> = std::result::Result<T, Error>;

/// An external command that exited nonzero or could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{command}` {}", describe_exit(.exit_code, .stderr))]
pub struct ExecutionError {
    /// The full command line, program first
    pub command: String,
    /// Exit code, `None` if the process never started or died from a signal
    pub exit_code: Option<i32>,
    /// Trailing lines of stderr
    pub stderr: String,
}

impl ExecutionError {
    /// Whether the runtime reported the target container as missing.
    pub fn is_not_found(&self) -> bool {
        let stderr = self.stderr.to_lowercase();
        stderr.contains("not found") || stderr.contains("no such container")
    }
}

fn describe_exit(exit_code: &Option<i32>, stderr: &str) -> String {
    let status = match exit_code {
        Some(code) => format!("exited with status {}", code),
        None => "did not run to completion".to_string(),
    };
    match stderr.trim() {
        "" => status,
        stderr => format!("{}: {}", status, stderr),
    }
}

/// kinc errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A provisioning step failed. `reached` is the last state the node got to.
    #[error("failed to {step}: {source}")]
    Step {
        step: Step,
        reached: NodeState,
        #[source]
        source: Box<Error>,
    },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    /// The step that failed, if this error came out of the provisioning pipeline.
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            Error::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}
