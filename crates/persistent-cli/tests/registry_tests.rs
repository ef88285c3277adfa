//! Integration tests for the process registry.
//!
//! These launch real `cat` and `sh` processes and only run on Unix.

#![cfg(unix)]

use persistent_cli::error::{LaunchError, ProcessError};
use persistent_cli::{
    Error, InputChannel, LaunchSpec, NullDispatcher, ProcessKey, ProcessLauncher,
    ProcessRegistry, RegistryOptions, SessionId, ToolId,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn registry() -> ProcessRegistry {
    ProcessRegistry::new(
        Arc::new(ProcessLauncher::new()),
        Arc::new(NullDispatcher),
        RegistryOptions::default().without_reaper(),
    )
}

fn cat() -> LaunchSpec {
    LaunchSpec::new("cat")
}

async fn wait_for_exit(entry: &persistent_cli::ProcessEntry) {
    for _ in 0..200 {
        if !entry.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_evict_session_is_exact() {
    let registry = registry();
    let (a, b) = (SessionId::new("alpha"), SessionId::new("alpha-2"));
    let (codex, claude) = (ToolId::new("codex"), ToolId::new("claude"));

    let a_codex = registry.acquire(&a, &codex, &cat()).await.unwrap();
    let a_claude = registry.acquire(&a, &claude, &cat()).await.unwrap();
    let b_codex = registry.acquire(&b, &codex, &cat()).await.unwrap();
    assert_eq!(registry.len(), 3);

    let evicted = registry.evict_session(&a).await;
    assert_eq!(evicted, 2);
    assert!(!a_codex.is_running());
    assert!(!a_claude.is_running());
    assert!(b_codex.is_running());

    let remaining = registry.list_active();
    assert_eq!(remaining, vec![ProcessKey::new("alpha-2", "codex")]);

    // Nothing left for the evicted session.
    assert_eq!(registry.evict_session(&a).await, 0);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_sessions_get_distinct_processes() {
    let registry = registry();
    let tool = ToolId::new("codex");

    let first = registry.acquire(&SessionId::new("s1"), &tool, &cat()).await.unwrap();
    let second = registry.acquire(&SessionId::new("s2"), &tool, &cat()).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.pid(), second.pid());
    registry.shutdown().await;
}

#[tokio::test]
async fn test_launch_failure_is_reported_and_not_registered() {
    let registry = registry();
    let spec = LaunchSpec::new("/definitely/not/a/real/binary-7f3a");

    let err = registry
        .acquire(&SessionId::new("s1"), &ToolId::new("ghost"), &spec)
        .await
        .unwrap_err();

    assert!(err.is_launch_failure());
    assert!(matches!(err, Error::Launch(LaunchError::SpawnFailed { .. })));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_sweep_uses_last_use_not_creation() {
    let registry = registry();
    let tool = ToolId::new("cat");
    let old = registry.acquire(&SessionId::new("old"), &tool, &cat()).await.unwrap();
    let active = registry.acquire(&SessionId::new("active"), &tool, &cat()).await.unwrap();

    let base = Instant::now();
    old.touch_at(base);
    active.touch_at(base + Duration::from_secs(50));

    let timeout = Duration::from_secs(30);
    let now = base + Duration::from_secs(60);
    assert!(old.idle_for(now) > timeout);
    assert!(active.idle_for(now) <= timeout);

    assert_eq!(registry.sweep_idle_at(now, timeout).await, 1);
    assert!(registry.get(old.key()).is_none());
    assert!(registry.get(active.key()).is_some());

    // A second sweep at the same instant finds nothing new.
    assert_eq!(registry.sweep_idle_at(now, timeout).await, 0);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_sweep_removes_exited_even_when_recently_used() {
    let registry = registry();
    let exits = LaunchSpec::new("sh").with_arguments(["-c", "exit 0"]);
    let dead = registry
        .acquire(&SessionId::new("dead"), &ToolId::new("sh"), &exits)
        .await
        .unwrap();
    let idle = registry
        .acquire(&SessionId::new("idle"), &ToolId::new("cat"), &cat())
        .await
        .unwrap();
    let fresh = registry
        .acquire(&SessionId::new("fresh"), &ToolId::new("cat"), &cat())
        .await
        .unwrap();
    wait_for_exit(&dead).await;

    let base = Instant::now();
    let now = base + Duration::from_secs(120);
    dead.touch_at(now);
    idle.touch_at(base);
    fresh.touch_at(now);

    assert_eq!(registry.sweep_idle_at(now, Duration::from_secs(60)).await, 2);
    assert_eq!(registry.list_active(), vec![fresh.key().clone()]);
    assert!(fresh.is_running());
    assert!(!idle.is_running());
    registry.shutdown().await;
}

#[tokio::test]
async fn test_send_to_exited_process_is_not_running() {
    let registry = registry();
    let spec = LaunchSpec::new("sh").with_arguments(["-c", "exit 0"]);
    let entry = registry
        .acquire(&SessionId::new("s1"), &ToolId::new("sh"), &spec)
        .await
        .unwrap();
    wait_for_exit(&entry).await;

    let before = entry.last_used();
    let err = InputChannel::new().send(&entry, "hello").await.unwrap_err();
    assert!(err.is_not_running());
    assert!(err.is_recoverable());
    assert_eq!(entry.last_used(), before);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_send_refreshes_last_use() {
    let registry = registry();
    let entry = registry
        .acquire(&SessionId::new("s1"), &ToolId::new("cat"), &cat())
        .await
        .unwrap();

    let before = entry.last_used();
    tokio::time::sleep(Duration::from_millis(20)).await;
    InputChannel::new().send(&entry, "ping").await.unwrap();
    assert!(entry.last_used() > before);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_describes_entries() {
    let registry = registry();
    registry
        .acquire(&SessionId::new("s1"), &ToolId::new("cat"), &cat())
        .await
        .unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].command, "cat");
    assert!(snapshot[0].pid.is_some());
    registry.shutdown().await;
}

#[tokio::test]
async fn test_acquire_after_shutdown_fails() {
    let registry = registry();
    registry.shutdown().await;
    assert!(registry.is_shut_down());

    let err = registry
        .acquire(&SessionId::new("s1"), &ToolId::new("cat"), &cat())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Process(ProcessError::ShutDown)));
}

#[tokio::test]
async fn test_background_reaper_evicts_idle_processes() {
    let registry = ProcessRegistry::new(
        Arc::new(ProcessLauncher::new()),
        Arc::new(NullDispatcher),
        RegistryOptions {
            idle_timeout: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(50),
            start_reaper: true,
        },
    );
    let entry = registry
        .acquire(&SessionId::new("s1"), &ToolId::new("cat"), &cat())
        .await
        .unwrap();
    assert_eq!(registry.len(), 1);

    for _ in 0..100 {
        if registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(registry.is_empty());
    assert!(registry.get(entry.key()).is_none());
    wait_for_exit(&entry).await;
    assert!(!entry.is_running());
    registry.shutdown().await;
}
