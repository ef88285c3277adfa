//! Starting tool processes.

use crate::config::ToolDescriptor;
use crate::env::{EnvMap, apply_environment};
use crate::error::LaunchError;
use crate::normalizer::{AdapterKind, OutputMode};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, error};

/// Everything needed to start one tool process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    /// Executable.
    pub command: String,
    /// Argument vector.
    pub arguments: Vec<String>,
    /// Working directory; inherited when unset.
    pub working_directory: Option<PathBuf>,
    /// Resolved environment variables.
    pub environment: EnvMap,
    /// Output protocol.
    pub output_mode: OutputMode,
    /// Output adapter; inferred from the tool id when unset.
    pub adapter: Option<AdapterKind>,
}

impl LaunchSpec {
    /// Spec running `command` with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: Vec::new(),
            working_directory: None,
            environment: EnvMap::new(),
            output_mode: OutputMode::default(),
            adapter: None,
        }
    }

    /// Spec for a configured tool in persistent mode.
    ///
    /// `working_directory` wins over the descriptor's own directory.
    pub fn from_descriptor(
        descriptor: &ToolDescriptor,
        working_directory: Option<&Path>,
        environment: EnvMap,
    ) -> Result<Self> {
        Ok(Self {
            command: descriptor.command.clone(),
            arguments: descriptor.persistent_arguments()?,
            working_directory: working_directory
                .map(Path::to_path_buf)
                .or_else(|| descriptor.working_directory.clone()),
            environment,
            output_mode: descriptor.output_mode,
            adapter: descriptor.adapter,
        })
    }

    /// Replace the arguments.
    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Add one environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Set the output mode.
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// Set the adapter.
    pub fn with_adapter(mut self, adapter: AdapterKind) -> Self {
        self.adapter = Some(adapter);
        self
    }
}

/// A started child with its three pipes detached.
#[derive(Debug)]
pub struct LaunchedProcess {
    /// Child handle; killed when dropped.
    pub child: Child,
    /// Standard input.
    pub stdin: ChildStdin,
    /// Standard output.
    pub stdout: ChildStdout,
    /// Standard error.
    pub stderr: ChildStderr,
}

/// Starts processes from a [`LaunchSpec`].
#[async_trait]
pub trait Launcher: Send + Sync + fmt::Debug {
    /// Start one process.
    ///
    /// On failure nothing is left running.
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess>;
}

/// OS launcher backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Create a new launcher.
    pub fn new() -> Self {
        Self
    }

    fn build_command(spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.arguments)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }
        apply_environment(&mut cmd, &spec.environment);
        cmd
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess> {
        debug!(
            command = %spec.command,
            args = ?spec.arguments,
            cwd = ?spec.working_directory,
            env_vars = spec.environment.len(),
            "Spawning process"
        );

        let mut child = Self::build_command(spec).spawn().map_err(|e| {
            error!(command = %spec.command, "Failed to spawn process: {}", e);
            LaunchError::SpawnFailed {
                command: spec.command.clone(),
                reason: e.to_string(),
                source: e,
            }
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        match (stdin, stdout, stderr) {
            (Some(stdin), Some(stdout), Some(stderr)) => Ok(LaunchedProcess {
                child,
                stdin,
                stdout,
                stderr,
            }),
            (stdin, stdout, _) => {
                let pipe = if stdin.is_none() {
                    "stdin"
                } else if stdout.is_none() {
                    "stdout"
                } else {
                    "stderr"
                };
                // kill_on_drop covers the rest once `child` goes out of scope
                let _ = child.start_kill();
                Err(LaunchError::MissingPipe {
                    command: spec.command.clone(),
                    pipe,
                }
                .into())
            }
        }
    }
}
