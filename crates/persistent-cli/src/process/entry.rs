//! One live tool process plus its bookkeeping.

use crate::core::{ProcessKey, SessionId, ToolId};
use crate::normalizer::OutputMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long teardown waits for a killed child to be reaped.
pub const TEARDOWN_WAIT: Duration = Duration::from_secs(2);

/// A registered process.
///
/// Entries are owned by the [`ProcessRegistry`](super::ProcessRegistry);
/// callers hold an `Arc` for the duration of a send and never tear one down
/// themselves.
#[derive(Debug)]
pub struct ProcessEntry {
    key: ProcessKey,
    pid: Option<u32>,
    command: String,
    output_mode: OutputMode,
    created_at: DateTime<Utc>,
    last_used: Mutex<LastUsed>,
    child: Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Copy)]
struct LastUsed {
    instant: Instant,
    wall: DateTime<Utc>,
}

/// Serializable view of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    /// Owning session.
    pub session_id: SessionId,
    /// Tool.
    pub tool_id: ToolId,
    /// OS process id, when known.
    pub pid: Option<u32>,
    /// Executable.
    pub command: String,
    /// Output protocol.
    pub output_mode: OutputMode,
    /// Launch time.
    pub created_at: DateTime<Utc>,
    /// Last use.
    pub last_used_at: DateTime<Utc>,
    /// Whether the process was alive when the snapshot was taken.
    pub is_running: bool,
}

impl ProcessEntry {
    /// Wrap a freshly spawned child.
    pub fn new(
        key: ProcessKey,
        command: impl Into<String>,
        output_mode: OutputMode,
        child: Child,
        stdin: ChildStdin,
    ) -> Self {
        let now = LastUsed {
            instant: Instant::now(),
            wall: Utc::now(),
        };
        Self {
            key,
            pid: child.id(),
            command: command.into(),
            output_mode,
            created_at: now.wall,
            last_used: Mutex::new(now),
            child: Mutex::new(Some(child)),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            pumps: Mutex::new(Vec::new()),
        }
    }

    /// Registry key.
    pub fn key(&self) -> &ProcessKey {
        &self.key
    }

    /// OS process id.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Output protocol.
    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Launch time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the child exists and has not exited.
    ///
    /// Non-blocking. Once an exit is observed the handle is released and the
    /// entry stays not-running.
    pub fn is_running(&self) -> bool {
        let Ok(mut guard) = self.child.lock() else {
            return false;
        };
        let Some(child) = guard.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(key = %self.key, ?status, "Process exited");
                *guard = None;
                false
            }
            Err(e) => {
                warn!(key = %self.key, "Failed to query process status: {}", e);
                *guard = None;
                false
            }
        }
    }

    /// Record a use now.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    /// Record a use at `instant`. Earlier instants than the current value are ignored.
    pub fn touch_at(&self, instant: Instant) {
        if let Ok(mut last) = self.last_used.lock() {
            if instant > last.instant {
                let delta = instant - last.instant;
                last.wall += chrono::Duration::from_std(delta).unwrap_or_else(|_| chrono::Duration::zero());
                last.instant = instant;
            }
        }
    }

    /// Monotonic time of last use.
    pub fn last_used(&self) -> Instant {
        self.last_used
            .lock()
            .map(|last| last.instant)
            .unwrap_or_else(|e| e.into_inner().instant)
    }

    /// Wall-clock time of last use.
    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used
            .lock()
            .map(|last| last.wall)
            .unwrap_or_else(|e| e.into_inner().wall)
    }

    /// Time since last use, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used())
    }

    /// Snapshot for diagnostics.
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            session_id: self.key.session_id().clone(),
            tool_id: self.key.tool_id().clone(),
            pid: self.pid,
            command: self.command.clone(),
            output_mode: self.output_mode,
            created_at: self.created_at,
            last_used_at: self.last_used_at(),
            is_running: self.is_running(),
        }
    }

    pub(crate) fn stdin(&self) -> &tokio::sync::Mutex<Option<ChildStdin>> {
        &self.stdin
    }

    pub(crate) fn attach_pumps(&self, handles: Vec<JoinHandle<()>>) {
        match self.pumps.lock() {
            Ok(mut pumps) => pumps.extend(handles),
            Err(e) => e.into_inner().extend(handles),
        }
    }

    fn abort_pumps(&self) {
        let handles = match self.pumps.lock() {
            Ok(mut pumps) => std::mem::take(&mut *pumps),
            Err(e) => std::mem::take(&mut *e.into_inner()),
        };
        for handle in handles {
            handle.abort();
        }
    }

    /// Kill the child and release its resources. Never fails.
    ///
    /// Does not wait for an in-flight send; that send fails once the pipe closes.
    pub(crate) async fn terminate(&self) {
        let child = match self.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => e.into_inner().take(),
        };

        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }
        self.abort_pumps();

        let Some(mut child) = child else {
            debug!(key = %self.key, "Process already gone");
            return;
        };

        if let Err(e) = child.start_kill() {
            // Already-exited children report InvalidInput here.
            debug!(key = %self.key, pid = ?self.pid, "Kill signal not delivered: {}", e);
        }

        match tokio::time::timeout(TEARDOWN_WAIT, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(key = %self.key, pid = ?self.pid, ?status, "Process terminated");
            }
            Ok(Err(e)) => {
                warn!(key = %self.key, pid = ?self.pid, "Failed to reap process: {}", e);
            }
            Err(_) => {
                warn!(key = %self.key, pid = ?self.pid, "Process did not exit within {:?}", TEARDOWN_WAIT);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_used(&self, instant: Instant) {
        if let Ok(mut last) = self.last_used.lock() {
            last.instant = instant;
        }
    }
}

impl Drop for ProcessEntry {
    fn drop(&mut self) {
        self.abort_pumps();
    }
}
