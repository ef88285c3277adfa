//! Session-level facade over configuration, environment and processes.
//!
//! [`SessionHost`] is what a request handler talks to: it resolves a tool
//! descriptor and its environment, acquires the session's process, sends the
//! prompt, and on a "not running" failure relaunches once and retries.

use crate::config::RuntimeConfig;
use crate::core::{SessionId, ToolId};
use crate::dispatch::EventDispatcher;
use crate::env::{EnvironmentResolver, EnvironmentStore};
use crate::events::UnifiedCliEvent;
use crate::process::{
    InputChannel, LaunchSpec, Launcher, ProcessEntry, ProcessLauncher, ProcessRegistry,
    RegistryOptions,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-session resume state.
///
/// Tracks the tool's own thread id so a later turn can resume the same
/// conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliSessionContext {
    /// Web session.
    pub session_id: SessionId,
    /// The tool's thread id, once seen.
    #[serde(default)]
    pub cli_thread_id: Option<String>,
    /// Working directory for this session's tools.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

impl CliSessionContext {
    /// Fresh context with no thread id.
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            cli_thread_id: None,
            working_directory: None,
        }
    }

    /// Set the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Whether the next turn continues an existing tool thread.
    pub fn is_resume(&self) -> bool {
        self.cli_thread_id.is_some()
    }

    /// Capture the thread id from `event`. Returns whether it changed.
    pub fn observe(&mut self, event: &UnifiedCliEvent) -> bool {
        match &event.cli_thread_id {
            Some(thread_id) if !thread_id.is_empty() && self.cli_thread_id.as_ref() != Some(thread_id) => {
                debug!(session = %self.session_id, thread_id = %thread_id, "Captured tool thread id");
                self.cli_thread_id = Some(thread_id.clone());
                true
            }
            _ => false,
        }
    }
}

/// Wires configuration, environment resolution and the process registry.
#[derive(Debug, Clone)]
pub struct SessionHost {
    config: Arc<RuntimeConfig>,
    resolver: EnvironmentResolver,
    registry: ProcessRegistry,
    input: InputChannel,
}

impl SessionHost {
    /// Assemble from existing parts.
    pub fn new(config: RuntimeConfig, resolver: EnvironmentResolver, registry: ProcessRegistry) -> Self {
        Self {
            config: Arc::new(config),
            resolver,
            registry,
            input: InputChannel::new(),
        }
    }

    /// Build everything from configuration with the OS launcher.
    ///
    /// Starts the idle reaper, so this must run inside a Tokio runtime.
    pub fn start(
        config: RuntimeConfig,
        store: Option<Arc<dyn EnvironmentStore>>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self::with_launcher(config, store, dispatcher, Arc::new(ProcessLauncher::new()))
    }

    /// Like [`start`](Self::start) with a custom launcher.
    pub fn with_launcher(
        config: RuntimeConfig,
        store: Option<Arc<dyn EnvironmentStore>>,
        dispatcher: Arc<dyn EventDispatcher>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let resolver = EnvironmentResolver::from_config(&config, store);
        let registry = ProcessRegistry::new(launcher, dispatcher, RegistryOptions::from_config(&config));
        info!(
            tools = config.tools.len(),
            idle_timeout_secs = config.idle_timeout_secs,
            "Session host started"
        );
        Self::new(config, resolver, registry)
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Environment resolver.
    pub fn resolver(&self) -> &EnvironmentResolver {
        &self.resolver
    }

    /// Process registry.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Launch parameters for `tool_id`.
    ///
    /// The working directory comes from `working_directory`, then the tool,
    /// then the configured default.
    pub async fn launch_spec(&self, tool_id: &ToolId, working_directory: Option<&Path>) -> Result<LaunchSpec> {
        let descriptor = self.config.tool(tool_id)?;
        let environment = self.resolver.resolve(tool_id).await;
        let mut spec = LaunchSpec::from_descriptor(descriptor, working_directory, environment)?;
        if spec.working_directory.is_none() {
            spec.working_directory = self.config.default_working_directory.clone();
        }
        Ok(spec)
    }

    /// Send `prompt` to the session's process for `tool_id`.
    pub async fn send_prompt(&self, session_id: &SessionId, tool_id: &ToolId, prompt: &str) -> Result<Arc<ProcessEntry>> {
        let context = CliSessionContext::new(session_id.clone());
        self.send_prompt_with(&context, tool_id, prompt, &CancellationToken::new())
            .await
    }

    /// Send `prompt` for a session context, honouring its working directory and `cancel`.
    ///
    /// When the process turns out to be gone, it is replaced and the send is
    /// retried once. A second failure is returned to the caller.
    pub async fn send_prompt_with(
        &self,
        context: &CliSessionContext,
        tool_id: &ToolId,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<ProcessEntry>> {
        let spec = self
            .launch_spec(tool_id, context.working_directory.as_deref())
            .await?;
        let session_id = &context.session_id;

        let entry = self.registry.acquire(session_id, tool_id, &spec).await?;
        match self.input.send_with_cancel(&entry, prompt, cancel).await {
            Ok(()) => Ok(entry),
            Err(e) if e.is_not_running() => {
                warn!(session = %session_id, tool = %tool_id, "Process gone during send, relaunching");
                self.registry.discard(&entry).await;
                let entry = self.registry.acquire(session_id, tool_id, &spec).await?;
                self.input.send_with_cancel(&entry, prompt, cancel).await?;
                Ok(entry)
            }
            Err(e) => Err(e),
        }
    }

    /// Release every process of `session_id` now.
    pub async fn end_session(&self, session_id: &SessionId) -> usize {
        self.registry.evict_session(session_id).await
    }

    /// Tear everything down.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_types;

    #[test]
    fn test_context_observe_captures_thread_id() {
        let mut context = CliSessionContext::new("s1");
        assert!(!context.is_resume());

        let started = UnifiedCliEvent::new(event_types::THREAD_STARTED).with_thread_id("th-9");
        assert!(context.observe(&started));
        assert!(context.is_resume());
        assert_eq!(context.cli_thread_id.as_deref(), Some("th-9"));

        assert!(!context.observe(&started));
        assert!(!context.observe(&UnifiedCliEvent::new(event_types::TURN_STARTED)));
        assert_eq!(context.cli_thread_id.as_deref(), Some("th-9"));
    }

    #[test]
    fn test_context_serde() {
        let context = CliSessionContext::new("s1").with_working_directory("/tmp/w");
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["workingDirectory"], "/tmp/w");
    }
}
