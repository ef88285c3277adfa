//! Environment-variable resolution for tool processes.
//!
//! Each tool has static defaults in its [`ToolDescriptor`](crate::config::ToolDescriptor)
//! and may have user overrides held by an external [`EnvironmentStore`]. The
//! resolver layers overrides on top of defaults, key by key. A value that is
//! empty or whitespace-only is never applied from either layer, so a blank
//! override cannot mask a configured default or an inherited variable.

use crate::config::RuntimeConfig;
use crate::core::ToolId;
use crate::error::ConfigError;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Encoding variables forced to UTF-8 on Windows hosts.
pub const WINDOWS_UTF8_VARIABLES: [&str; 3] = [
    "PYTHONIOENCODING",
    "PYTHONLEGACYWINDOWSSTDIO",
    "PYTHONLEGACYWINDOWSFSENCODING",
];

/// Environment variable map.
pub type EnvMap = HashMap<String, String>;

/// Persistent store of per-tool environment overrides.
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Overrides for `tool_id`, or `None` when nothing is stored.
    async fn load(&self, tool_id: &ToolId) -> Result<Option<EnvMap>>;

    /// Replace the overrides for `tool_id`.
    async fn save(&self, tool_id: &ToolId, vars: EnvMap) -> Result<()>;

    /// Remove the overrides for `tool_id`. Returns whether anything was stored.
    async fn delete(&self, tool_id: &ToolId) -> Result<bool>;
}

/// Process-local [`EnvironmentStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryEnvironmentStore {
    entries: Arc<RwLock<HashMap<ToolId, EnvMap>>>,
}

impl InMemoryEnvironmentStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvironmentStore for InMemoryEnvironmentStore {
    async fn load(&self, tool_id: &ToolId) -> Result<Option<EnvMap>> {
        Ok(self.entries.read().await.get(tool_id).cloned())
    }

    async fn save(&self, tool_id: &ToolId, vars: EnvMap) -> Result<()> {
        self.entries.write().await.insert(tool_id.clone(), vars);
        Ok(())
    }

    async fn delete(&self, tool_id: &ToolId) -> Result<bool> {
        Ok(self.entries.write().await.remove(tool_id).is_some())
    }
}

/// Combines static defaults with store overrides.
#[derive(Clone)]
pub struct EnvironmentResolver {
    defaults: HashMap<ToolId, EnvMap>,
    store: Option<Arc<dyn EnvironmentStore>>,
}

impl std::fmt::Debug for EnvironmentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentResolver")
            .field("tools", &self.defaults.len())
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl EnvironmentResolver {
    /// Resolver over the static defaults in `config`.
    pub fn from_config(config: &RuntimeConfig, store: Option<Arc<dyn EnvironmentStore>>) -> Self {
        let defaults = config
            .tools
            .iter()
            .map(|tool| (tool.id.clone(), tool.static_environment()))
            .collect();
        Self { defaults, store }
    }

    /// Resolver with explicit defaults.
    pub fn new(defaults: HashMap<ToolId, EnvMap>, store: Option<Arc<dyn EnvironmentStore>>) -> Self {
        Self { defaults, store }
    }

    /// Static defaults for `tool_id` with blank values removed.
    pub fn static_defaults(&self, tool_id: &ToolId) -> EnvMap {
        self.defaults
            .get(tool_id)
            .map(non_blank)
            .unwrap_or_default()
    }

    /// Effective variables for `tool_id`.
    ///
    /// A store failure is logged and the static defaults are returned.
    pub async fn resolve(&self, tool_id: &ToolId) -> EnvMap {
        let mut resolved = self.static_defaults(tool_id);
        let Some(store) = &self.store else {
            return resolved;
        };

        match store.load(tool_id).await {
            Ok(Some(overrides)) => {
                let mut applied = 0usize;
                for (name, value) in overrides {
                    if !is_blank(&value) {
                        resolved.insert(name, value);
                        applied += 1;
                    }
                }
                debug!(tool = %tool_id, applied, "Applied stored environment overrides");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(tool = %tool_id, "Environment store failed, using defaults: {}", e);
            }
        }
        resolved
    }

    /// Store overrides for `tool_id`.
    pub async fn save(&self, tool_id: &ToolId, vars: EnvMap) -> Result<()> {
        self.require_store()?.save(tool_id, vars).await
    }

    /// Remove stored overrides for `tool_id`.
    pub async fn delete(&self, tool_id: &ToolId) -> Result<bool> {
        self.require_store()?.delete(tool_id).await
    }

    /// Drop stored overrides and return the static defaults.
    pub async fn reset_to_default(&self, tool_id: &ToolId) -> Result<EnvMap> {
        if let Some(store) = &self.store {
            store.delete(tool_id).await?;
        }
        Ok(self.static_defaults(tool_id))
    }

    fn require_store(&self) -> Result<&Arc<dyn EnvironmentStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| ConfigError::Store("no environment store configured".to_string()).into())
    }
}

/// Whether a value is empty or whitespace-only.
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn non_blank(vars: &EnvMap) -> EnvMap {
    vars.iter()
        .filter(|(_, value)| !is_blank(value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Variables that should actually be set on a child, in name order.
///
/// Blank values are skipped. On Windows, a non-empty map also gets the
/// Python encoding variables set to `utf-8` unless the map names them.
pub fn effective_environment(vars: &EnvMap, windows: bool) -> Vec<(String, String)> {
    let mut effective: Vec<(String, String)> = vars
        .iter()
        .filter(|(_, value)| !is_blank(value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    if windows && !vars.is_empty() {
        for name in WINDOWS_UTF8_VARIABLES {
            if !vars.contains_key(name) {
                effective.push((name.to_string(), "utf-8".to_string()));
            }
        }
    }

    effective.sort();
    effective
}

/// Apply `vars` to a command about to be spawned.
pub fn apply_environment(command: &mut tokio::process::Command, vars: &EnvMap) {
    for (name, value) in effective_environment(vars, cfg!(windows)) {
        command.env(name, value);
    }
}
