//! Runtime configuration: idle-eviction timings and tool descriptors.
//!
//! Configuration lives in a TOML file, by default
//! `<config_dir>/persistent-cli/config.toml`. The location can be overridden
//! with the `PERSISTENT_CLI_CONFIG` environment variable, and individual
//! timings with `PERSISTENT_CLI_IDLE_TIMEOUT_SECS` and
//! `PERSISTENT_CLI_SWEEP_INTERVAL_SECS`.
//!
//! ```toml
//! idle_timeout_secs = 1800
//! sweep_interval_secs = 300
//!
//! [[tools]]
//! id = "codex"
//! command = "codex"
//! argument_template = "exec --json \"{prompt}\""
//! persistent_mode_arguments = "proto"
//! output_mode = "jsonl"
//!
//! [tools.environment_variables]
//! OPENAI_BASE_URL = "https://api.example.com/v1"
//! ```

use crate::core::ToolId;
use crate::error::{ConfigError, LaunchError};
use crate::normalizer::{AdapterKind, OutputMode};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the configuration file.
pub const ENV_CONFIG_PATH: &str = "PERSISTENT_CLI_CONFIG";
/// Environment override for [`RuntimeConfig::idle_timeout_secs`].
pub const ENV_IDLE_TIMEOUT_SECS: &str = "PERSISTENT_CLI_IDLE_TIMEOUT_SECS";
/// Environment override for [`RuntimeConfig::sweep_interval_secs`].
pub const ENV_SWEEP_INTERVAL_SECS: &str = "PERSISTENT_CLI_SWEEP_INTERVAL_SECS";

/// Placeholder for the user's prompt inside an argument template.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Default idle timeout: 30 minutes.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;
/// Default sweep period: 5 minutes.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;
/// Upper bound for the idle timeout and the sweep period: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds an unused process may stay alive.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Seconds between idle sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Working directory for tools that do not set their own.
    #[serde(default)]
    pub default_working_directory: Option<PathBuf>,

    /// Known tools.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            default_working_directory: None,
            tools: Vec::new(),
        }
    }
}

/// How to start one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool id, unique within the configuration.
    pub id: ToolId,

    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Executable path or name resolved through `PATH`.
    pub command: String,

    /// Single-shot argument template containing [`PROMPT_PLACEHOLDER`].
    #[serde(default)]
    pub argument_template: String,

    /// Arguments for the long-lived interactive mode.
    #[serde(default)]
    pub persistent_mode_arguments: Option<String>,

    /// Static environment defaults.
    #[serde(default)]
    pub environment_variables: Option<HashMap<String, String>>,

    /// Output protocol.
    #[serde(default)]
    pub output_mode: OutputMode,

    /// Output adapter; inferred from the id when unset.
    #[serde(default)]
    pub adapter: Option<AdapterKind>,

    /// Working directory override.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

impl ToolDescriptor {
    /// Minimal descriptor, mostly for tests and programmatic setup.
    pub fn new(id: impl Into<ToolId>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            command: command.into(),
            argument_template: String::new(),
            persistent_mode_arguments: None,
            environment_variables: None,
            output_mode: OutputMode::default(),
            adapter: None,
            working_directory: None,
        }
    }

    /// Set the persistent-mode argument string.
    pub fn with_persistent_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.persistent_mode_arguments = Some(arguments.into());
        self
    }

    /// Set the output mode.
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// Add one static environment default.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_variables
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.as_str())
    }

    /// The raw argument string used for persistent mode.
    ///
    /// Falls back to the single-shot template with the prompt placeholder
    /// (and any quotes wrapped directly around it) removed.
    pub fn persistent_argument_string(&self) -> String {
        match &self.persistent_mode_arguments {
            Some(arguments) if !arguments.trim().is_empty() => arguments.clone(),
            _ => self
                .argument_template
                .replace(&format!("\"{}\"", PROMPT_PLACEHOLDER), "")
                .replace(&format!("'{}'", PROMPT_PLACEHOLDER), "")
                .replace(PROMPT_PLACEHOLDER, "")
                .trim()
                .to_string(),
        }
    }

    /// Persistent-mode arguments split into argv using shell quoting rules.
    pub fn persistent_arguments(&self) -> Result<Vec<String>> {
        let raw = self.persistent_argument_string();
        shlex::split(&raw).ok_or_else(|| {
            LaunchError::InvalidArguments {
                command: self.command.clone(),
                reason: format!("unbalanced quoting in '{}'", raw),
            }
            .into()
        })
    }

    /// Static environment defaults, or an empty map.
    pub fn static_environment(&self) -> HashMap<String, String> {
        self.environment_variables.clone().unwrap_or_default()
    }
}

impl RuntimeConfig {
    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Sweep period as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Look up a tool by id.
    pub fn tool(&self, tool_id: &ToolId) -> Result<&ToolDescriptor> {
        self.tools
            .iter()
            .find(|tool| &tool.id == tool_id)
            .ok_or_else(|| {
                ConfigError::UnknownTool {
                    tool_id: tool_id.to_string(),
                }
                .into()
            })
    }

    /// Default configuration file location.
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Ok(PathBuf::from(path));
        }
        let base = dirs::config_dir().ok_or_else(|| ConfigError::InvalidValue {
            key: "config_dir".to_string(),
            reason: "no configuration directory for this platform".to_string(),
        })?;
        Ok(base.join("persistent-cli").join("config.toml"))
    }

    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, or invalid.
    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from_path(&path).await
    }

    /// Load configuration from a specific path.
    ///
    /// Environment overrides are applied before validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, or invalid.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let mut config = Self::from_toml_str(&content, path)?;
        config.merge_env_vars()?;
        config.validate()?;

        info!(
            tools = config.tools.len(),
            "Configuration loaded from {}",
            path.display()
        );
        Ok(config)
    }

    /// Parse TOML without applying overrides or validation.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Apply overrides from the process environment.
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn merge_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_IDLE_TIMEOUT_SECS) {
            debug!("Overriding idle timeout from environment: {}", value);
            self.idle_timeout_secs = parse_secs(ENV_IDLE_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_SWEEP_INTERVAL_SECS) {
            debug!("Overriding sweep interval from environment: {}", value);
            self.sweep_interval_secs = parse_secs(ENV_SWEEP_INTERVAL_SECS, &value)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_secs == 0 {
            return Err(invalid("idle_timeout_secs", "must be greater than 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs", "must be greater than 0"));
        }
        let too_long = format!("must not exceed {} seconds", MAX_DURATION_SECS);
        if self.idle_timeout_secs > MAX_DURATION_SECS {
            return Err(invalid("idle_timeout_secs", &too_long));
        }
        if self.sweep_interval_secs > MAX_DURATION_SECS {
            return Err(invalid("sweep_interval_secs", &too_long));
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.id.as_str().trim().is_empty() {
                return Err(invalid("tools.id", "must not be empty"));
            }
            if !seen.insert(tool.id.clone()) {
                return Err(invalid("tools.id", &format!("duplicate tool id '{}'", tool.id)));
            }
            if tool.command.trim().is_empty() {
                return Err(invalid(
                    &format!("tools.{}.command", tool.id),
                    "must not be empty",
                ));
            }
            if shlex::split(&tool.persistent_argument_string()).is_none() {
                return Err(invalid(
                    &format!("tools.{}.persistent_mode_arguments", tool.id),
                    "unbalanced quoting",
                ));
            }
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(key, &format!("'{}' is not a number of seconds: {}", value, e)))
}

fn invalid(key: &str, reason: &str) -> crate::Error {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
