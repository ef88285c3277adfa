//! Process registry: one live process per (session, tool) key.
//!
//! The registry is the single source of truth for which processes exist. It
//! launches on demand, reuses live entries, replaces dead ones, and tears
//! entries down on session end, idle sweep, or shutdown.
//!
//! # Thread Safety
//!
//! - The entry map sits behind a `RwLock`; no lock is held across an `.await`.
//! - Launches are single-flight per key through a keyed async mutex, so two
//!   first-use callers for the same key never start two processes.
//! - Teardown happens after entries leave the map and never fails.

use super::entry::{ProcessEntry, ProcessInfo};
use super::launcher::{LaunchSpec, Launcher};
use super::output::{spawn_output_pump, spawn_stderr_logger};
use super::reaper::IdleReaper;
use crate::config::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_SWEEP_INTERVAL_SECS, RuntimeConfig};
use crate::core::{ProcessKey, SessionId, ToolId};
use crate::dispatch::EventDispatcher;
use crate::error::ProcessError;
use crate::normalizer::OutputNormalizer;
use crate::Result;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Registry timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Idle time after which an entry is evicted.
    pub idle_timeout: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Whether to run the background sweep at all.
    pub start_reaper: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            start_reaper: true,
        }
    }
}

impl RegistryOptions {
    /// Options from runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            sweep_interval: config.sweep_interval(),
            start_reaper: true,
        }
    }

    /// Disable the background sweep.
    pub fn without_reaper(mut self) -> Self {
        self.start_reaper = false;
        self
    }
}

type LaunchLock = Arc<tokio::sync::Mutex<()>>;

/// A caller's share of a key's launch lock.
///
/// Dropping it removes the lock from the table once nobody else holds it, on
/// success, failure and cancellation alike.
struct LaunchLease<'a> {
    registry: &'a ProcessRegistry,
    key: ProcessKey,
    lock: LaunchLock,
}

impl Drop for LaunchLease<'_> {
    fn drop(&mut self) {
        self.registry.release_launch_lock(&self.key, &self.lock);
    }
}

struct RegistryInner {
    entries: RwLock<HashMap<ProcessKey, Arc<ProcessEntry>>>,
    launch_locks: Mutex<HashMap<ProcessKey, LaunchLock>>,
    launcher: Arc<dyn Launcher>,
    dispatcher: Arc<dyn EventDispatcher>,
    options: RegistryOptions,
    shut_down: AtomicBool,
    reaper: tokio::sync::Mutex<Option<IdleReaper>>,
}

/// Thread-safe registry of long-lived tool processes.
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use persistent_cli::core::{SessionId, ToolId};
/// use persistent_cli::dispatch::NullDispatcher;
/// use persistent_cli::process::{LaunchSpec, ProcessLauncher, ProcessRegistry, RegistryOptions};
///
/// # async fn example() -> persistent_cli::Result<()> {
/// let registry = ProcessRegistry::new(
///     Arc::new(ProcessLauncher::new()),
///     Arc::new(NullDispatcher),
///     RegistryOptions::default(),
/// );
///
/// let session = SessionId::new("web-42");
/// let tool = ToolId::new("codex");
/// let spec = LaunchSpec::new("codex").with_arguments(["proto"]);
///
/// let entry = registry.acquire(&session, &tool, &spec).await?;
/// println!("pid {:?}", entry.pid());
///
/// registry.evict_session(&session).await;
/// registry.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProcessRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("entries", &self.len())
            .field("options", &self.inner.options)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl ProcessRegistry {
    /// Create a registry and, unless disabled, start its idle reaper.
    ///
    /// Must be called inside a Tokio runtime when the reaper is enabled.
    pub fn new(
        launcher: Arc<dyn Launcher>,
        dispatcher: Arc<dyn EventDispatcher>,
        options: RegistryOptions,
    ) -> Self {
        let inner = Arc::new(RegistryInner {
            entries: RwLock::new(HashMap::new()),
            launch_locks: Mutex::new(HashMap::new()),
            launcher,
            dispatcher,
            options,
            shut_down: AtomicBool::new(false),
            reaper: tokio::sync::Mutex::new(None),
        });

        if options.start_reaper {
            let weak: Weak<RegistryInner> = Arc::downgrade(&inner);
            let timeout = options.idle_timeout;
            let reaper = IdleReaper::start(options.sweep_interval, move || {
                let inner = weak.upgrade()?;
                Some(async move { Ok(ProcessRegistry { inner }.sweep_idle(timeout).await) })
            });
            if let Ok(mut slot) = inner.reaper.try_lock() {
                *slot = Some(reaper);
            }
        }

        Self { inner }
    }

    /// Registry options.
    pub fn options(&self) -> RegistryOptions {
        self.inner.options
    }

    /// Return the live entry for `(session_id, tool_id)`, launching one if needed.
    ///
    /// A live entry is reused and its `last_used` refreshed. A dead entry is
    /// torn down and replaced. Launch failures are returned as-is and never
    /// retried here.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::ShutDown`] after [`shutdown`](Self::shutdown).
    /// - [`LaunchError`](crate::error::LaunchError) when the process cannot start.
    pub async fn acquire(
        &self,
        session_id: &SessionId,
        tool_id: &ToolId,
        spec: &LaunchSpec,
    ) -> Result<Arc<ProcessEntry>> {
        self.ensure_open()?;
        let key = ProcessKey::new(session_id.clone(), tool_id.clone());

        if let Some(entry) = self.live_entry(&key)? {
            entry.touch();
            debug!(key = %key, pid = ?entry.pid(), "Reusing process");
            return Ok(entry);
        }

        let lease = self.lease_launch_lock(&key)?;
        let _guard = lease.lock.lock().await;

        // Another caller may have launched while we waited.
        self.ensure_open()?;
        if let Some(entry) = self.live_entry(&key)? {
            entry.touch();
            debug!(key = %key, pid = ?entry.pid(), "Reusing process launched concurrently");
            return Ok(entry);
        }

        if let Some(stale) = self.remove_entry(&key) {
            warn!(key = %key, pid = ?stale.pid(), "Replacing exited process");
            stale.terminate().await;
        }

        let launched = self.inner.launcher.launch(spec).await?;
        let entry = Arc::new(ProcessEntry::new(
            key.clone(),
            spec.command.clone(),
            spec.output_mode,
            launched.child,
            launched.stdin,
        ));

        let normalizer = OutputNormalizer::for_tool(tool_id, spec.output_mode, spec.adapter);
        entry.attach_pumps(vec![
            spawn_output_pump(
                key.clone(),
                launched.stdout,
                normalizer,
                self.inner.dispatcher.clone(),
            ),
            spawn_stderr_logger(key.clone(), launched.stderr),
        ]);

        {
            let mut entries = self
                .inner
                .entries
                .write()
                .map_err(|e| crate::Error::protocol(format!("Failed to lock registry: {}", e)))?;
            // Checked under the write lock so shutdown cannot miss this entry.
            if !self.is_shut_down() {
                entries.insert(key.clone(), entry.clone());
                info!(
                    session = %session_id,
                    tool = %tool_id,
                    pid = ?entry.pid(),
                    command = %spec.command,
                    "Launched process"
                );
                return Ok(entry);
            }
        }

        entry.terminate().await;
        Err(ProcessError::ShutDown.into())
    }

    /// Remove and tear down every entry of `session_id`. Returns how many were removed.
    pub async fn evict_session(&self, session_id: &SessionId) -> usize {
        let removed: Vec<Arc<ProcessEntry>> = {
            let mut entries = self.inner.entries.write().unwrap_or_else(|e| e.into_inner());
            let keys: Vec<ProcessKey> = entries
                .keys()
                .filter(|key| key.belongs_to(session_id))
                .cloned()
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };

        if !removed.is_empty() {
            info!(session = %session_id, count = removed.len(), "Evicting session processes");
        }
        self.teardown(removed).await
    }

    /// Remove and tear down entries that are dead or idle longer than `timeout`.
    pub async fn sweep_idle(&self, timeout: Duration) -> usize {
        self.sweep_idle_at(Instant::now(), timeout).await
    }

    /// [`sweep_idle`](Self::sweep_idle) against an explicit clock reading.
    ///
    /// An entry is removed when it is not running or when
    /// `now - last_used > timeout`. All others are left untouched.
    pub async fn sweep_idle_at(&self, now: Instant, timeout: Duration) -> usize {
        let candidates: Vec<(ProcessKey, Arc<ProcessEntry>)> = {
            let entries = self.inner.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .iter()
                .filter(|(_, entry)| !entry.is_running() || entry.idle_for(now) > timeout)
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }

        let removed: Vec<Arc<ProcessEntry>> = {
            let mut entries = self.inner.entries.write().unwrap_or_else(|e| e.into_inner());
            candidates
                .into_iter()
                .filter_map(|(key, candidate)| {
                    // Skip keys whose entry was replaced since the scan.
                    match entries.get(&key) {
                        Some(current) if Arc::ptr_eq(current, &candidate) => entries.remove(&key),
                        _ => None,
                    }
                })
                .collect()
        };

        for entry in &removed {
            debug!(
                key = %entry.key(),
                idle_secs = entry.idle_for(now).as_secs(),
                "Evicting idle or exited process"
            );
        }
        self.teardown(removed).await
    }

    /// Remove one specific entry if it is still the registered one.
    ///
    /// Used to force a relaunch when a process is alive but no longer accepts input.
    pub async fn discard(&self, entry: &Arc<ProcessEntry>) -> bool {
        let removed = {
            let mut entries = self.inner.entries.write().unwrap_or_else(|e| e.into_inner());
            match entries.get(entry.key()) {
                Some(current) if Arc::ptr_eq(current, entry) => entries.remove(entry.key()),
                _ => None,
            }
        };
        match removed {
            Some(entry) => {
                self.teardown(vec![entry]).await;
                true
            }
            None => false,
        }
    }

    /// Tear down every entry and stop the reaper. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Registry already shut down");
            return;
        }

        if let Some(mut reaper) = self.inner.reaper.lock().await.take() {
            reaper.stop().await;
        }

        let removed: Vec<Arc<ProcessEntry>> = {
            let mut entries = self.inner.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = self.teardown(removed).await;
        info!(count, "Process registry shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Registered entry for `key`, live or not.
    pub fn get(&self, key: &ProcessKey) -> Option<Arc<ProcessEntry>> {
        let entries = self.inner.entries.read().ok()?;
        entries.get(key).cloned()
    }

    /// Keys of all registered entries.
    pub fn list_active(&self) -> Vec<ProcessKey> {
        self.inner
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or_default()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Diagnostic snapshot of every entry.
    pub fn snapshot(&self) -> Vec<ProcessInfo> {
        let entries: Vec<Arc<ProcessEntry>> = self
            .inner
            .entries
            .read()
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default();
        entries.iter().map(|entry| entry.info()).collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(ProcessError::ShutDown.into())
        } else {
            Ok(())
        }
    }

    fn live_entry(&self, key: &ProcessKey) -> Result<Option<Arc<ProcessEntry>>> {
        let entries = self
            .inner
            .entries
            .read()
            .map_err(|e| crate::Error::protocol(format!("Failed to lock registry: {}", e)))?;
        Ok(entries.get(key).filter(|entry| entry.is_running()).cloned())
    }

    fn remove_entry(&self, key: &ProcessKey) -> Option<Arc<ProcessEntry>> {
        self.inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    fn lease_launch_lock(&self, key: &ProcessKey) -> Result<LaunchLease<'_>> {
        let mut locks = self
            .inner
            .launch_locks
            .lock()
            .map_err(|e| crate::Error::protocol(format!("Failed to lock launch table: {}", e)))?;
        let lock = locks.entry(key.clone()).or_default().clone();
        Ok(LaunchLease {
            registry: self,
            key: key.clone(),
            lock,
        })
    }

    fn release_launch_lock(&self, key: &ProcessKey, lock: &LaunchLock) {
        let mut locks = self.inner.launch_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Held by the table and this lease only: no one else is waiting.
        if locks.get(key).is_some_and(|current| Arc::ptr_eq(current, lock))
            && Arc::strong_count(lock) == 2
        {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn launch_lock_count(&self) -> usize {
        self.inner.launch_locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    async fn teardown(&self, entries: Vec<Arc<ProcessEntry>>) -> usize {
        let count = entries.len();
        join_all(entries.iter().map(|entry| entry.terminate())).await;
        count
    }
}
