//! Error hierarchy for process management, configuration and output handling.
//!
//! # Error Hierarchy
//!
//! ```text
//! Error (top-level)
//! ├── Launch(LaunchError)
//! ├── Process(ProcessError)
//! ├── Config(ConfigError)
//! └── Protocol(String)
//! ```
//!
//! Failures local to one entry's lifecycle (teardown errors, a malformed
//! output line) never surface here: teardown is best-effort and malformed
//! output becomes an error *event*. Only failures that prevent satisfying the
//! caller's immediate request are returned as `Error`.
//!
//! # Examples
//!
//! ```rust
//! use persistent_cli::core::ProcessKey;
//! use persistent_cli::error::{Error, ProcessError};
//!
//! let error: Error = ProcessError::NotRunning {
//!     key: ProcessKey::new("s-1", "codex"),
//! }
//! .into();
//! assert!(error.is_recoverable());
//! ```

use crate::core::ProcessKey;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Starting a tool process failed.
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// Talking to a registered process failed.
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal invariant violated (poisoned lock, unexpected shape).
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors raised while starting a tool process.
///
/// `acquire` never retries a launch on its own; these are handed back to the
/// caller as-is.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The OS refused to start the executable (missing binary, permissions).
    #[error("Failed to spawn '{command}': {reason}")]
    SpawnFailed {
        /// Executable that failed to start
        command: String,
        /// Human readable root cause
        reason: String,
        /// Source error
        #[source]
        source: std::io::Error,
    },

    /// The child started but one of its standard streams was not captured.
    #[error("Process '{command}' started without a {pipe} pipe")]
    MissingPipe {
        /// Executable that was started
        command: String,
        /// `stdin`, `stdout` or `stderr`
        pipe: &'static str,
    },

    /// The argument string could not be split into an argv.
    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArguments {
        /// Executable the arguments were meant for
        command: String,
        /// Reason the arguments were rejected
        reason: String,
    },
}

/// Errors raised while using a registered process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process behind the entry has exited or was torn down.
    ///
    /// Recover by re-acquiring the key, which relaunches transparently.
    #[error("Process not running: {key}")]
    NotRunning {
        /// Registry key of the dead entry
        key: ProcessKey,
    },

    /// The caller cancelled a send before it completed.
    #[error("Send to {key} was cancelled")]
    SendCancelled {
        /// Registry key of the target entry
        key: ProcessKey,
    },

    /// Writing to the process's standard input failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry has been shut down and no longer hands out processes.
    #[error("Process registry is shut down")]
    ShutDown,
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// Configuration file is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration at {path}: {reason}")]
    Parse {
        /// Path to the file
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// I/O error reading the configuration file.
    #[error("I/O error accessing configuration at {path}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// Source error
        #[source]
        source: std::io::Error,
    },

    /// No tool with this id is configured.
    #[error("Unknown tool: {tool_id}")]
    UnknownTool {
        /// Tool id that was requested
        tool_id: String,
    },

    /// A setting has a semantically invalid value.
    #[error("Invalid setting '{key}': {reason}")]
    InvalidValue {
        /// Setting key
        key: String,
        /// Reason the value is invalid
        reason: String,
    },

    /// The environment-variable store failed.
    #[error("Environment store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether the caller can recover by re-acquiring and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Process(ProcessError::NotRunning { .. })
                | Self::Process(ProcessError::SendCancelled { .. })
        )
    }

    /// Whether this is the "process not running" condition.
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::Process(ProcessError::NotRunning { .. }))
    }

    /// Whether the error came from starting a process.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::Launch(_))
    }

    /// Create a new Protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a "not running" error for `key`.
    pub fn not_running(key: &ProcessKey) -> Self {
        Self::Process(ProcessError::NotRunning { key: key.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_failed_keeps_root_cause() {
        let error = LaunchError::SpawnFailed {
            command: "codex".to_string(),
            reason: "No such file or directory".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let msg = error.to_string();
        assert!(msg.contains("codex"));
        assert!(msg.contains("No such file"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_error_is_recoverable() {
        let key = ProcessKey::new("s", "t");
        assert!(Error::not_running(&key).is_recoverable());
        assert!(Error::from(ProcessError::SendCancelled { key }).is_recoverable());
        assert!(!Error::from(ProcessError::ShutDown).is_recoverable());
        assert!(!Error::protocol("bad").is_recoverable());
    }

    #[test]
    fn test_error_is_launch_failure() {
        let error: Error = LaunchError::MissingPipe {
            command: "claude".to_string(),
            pipe: "stdout",
        }
        .into();
        assert!(error.is_launch_failure());
        assert!(!error.is_not_running());
    }

    #[test]
    fn test_error_display_formats() {
        let errors = vec![
            Error::protocol("lock poisoned"),
            Error::not_running(&ProcessKey::new("s", "t")),
            Error::from(ConfigError::UnknownTool {
                tool_id: "nope".to_string(),
            }),
            Error::from(ProcessError::ShutDown),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
