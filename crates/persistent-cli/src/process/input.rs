//! Writing prompts to a process's standard input.

use super::entry::ProcessEntry;
use crate::error::{Error, ProcessError};
use crate::Result;
use std::io::ErrorKind;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// The only component that writes to a process's stdin.
///
/// Writes to one entry are serialized, so concurrent senders never interleave
/// partial lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputChannel;

impl InputChannel {
    /// Create a new input channel.
    pub fn new() -> Self {
        Self
    }

    /// Write `text` plus a newline and flush.
    ///
    /// # Errors
    ///
    /// Fails with [`ProcessError::NotRunning`] when the process has exited;
    /// `last_used` is left untouched in that case.
    pub async fn send(&self, entry: &ProcessEntry, text: &str) -> Result<()> {
        self.send_with_cancel(entry, text, &CancellationToken::new()).await
    }

    /// Like [`send`](Self::send), giving up if `cancel` fires before writing starts.
    ///
    /// Cancellation is only honoured while waiting for another sender to
    /// finish. Once the first byte is written the whole line is written, so a
    /// cancelled send never leaves a fragment that would prefix the next
    /// prompt. Cancelling never stops the process.
    pub async fn send_with_cancel(
        &self,
        entry: &ProcessEntry,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !entry.is_running() {
            return Err(Error::not_running(entry.key()));
        }

        let mut stdin = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(key = %entry.key(), "Send cancelled");
                return Err(ProcessError::SendCancelled { key: entry.key().clone() }.into());
            }
            stdin = entry.stdin().lock() => stdin,
        };

        let result = write_line(entry, &mut stdin, text).await;
        drop(stdin);

        if result.is_ok() {
            entry.touch();
            trace!(key = %entry.key(), bytes = text.len() + 1, "Sent input");
        }
        result
    }
}

/// Closes stdin on drop unless the line was written in full.
///
/// Covers write errors and a dropped send future alike: the process sees EOF
/// instead of a truncated prompt, and later sends fail with `NotRunning`.
struct LineWrite<'a> {
    slot: &'a mut Option<ChildStdin>,
    complete: bool,
}

impl Drop for LineWrite<'_> {
    fn drop(&mut self) {
        if !self.complete && self.slot.take().is_some() {
            warn!("Closed stdin after an incomplete write");
        }
    }
}

async fn write_line(entry: &ProcessEntry, slot: &mut Option<ChildStdin>, text: &str) -> Result<()> {
    let mut payload = String::with_capacity(text.len() + 1);
    payload.push_str(text);
    payload.push('\n');

    let mut write = LineWrite { slot, complete: false };
    let Some(stdin) = write.slot.as_mut() else {
        return Err(Error::not_running(entry.key()));
    };
    stdin
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_error(entry, e))?;
    stdin.flush().await.map_err(|e| io_error(entry, e))?;
    write.complete = true;
    Ok(())
}

fn io_error(entry: &ProcessEntry, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::BrokenPipe {
        Error::not_running(entry.key())
    } else {
        ProcessError::Io(e).into()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::ProcessKey;
    use crate::normalizer::OutputMode;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::Command;

    fn spawn_cat() -> (ProcessEntry, tokio::process::ChildStdout) {
        spawn("cat", &[])
    }

    /// `cat` that only starts reading after a second, so large writes block.
    fn spawn_slow_cat() -> (ProcessEntry, tokio::process::ChildStdout) {
        spawn("sh", &["-c", "sleep 1; cat"])
    }

    fn spawn(program: &str, args: &[&str]) -> (ProcessEntry, tokio::process::ChildStdout) {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("Failed to spawn test process");
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let entry = ProcessEntry::new(ProcessKey::new("s", program), program, OutputMode::Plain, child, stdin);
        (entry, stdout)
    }

    #[tokio::test]
    async fn test_send_writes_line_and_touches() {
        let (entry, stdout) = spawn_cat();
        let before = entry.last_used();
        tokio::time::sleep(Duration::from_millis(5)).await;

        InputChannel::new().send(&entry, "hello").await.unwrap();
        assert!(entry.last_used() > before);

        let mut lines = BufReader::new(stdout).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        entry.terminate().await;
    }

    #[tokio::test]
    async fn test_send_to_dead_process_fails_without_touching() {
        let (entry, _stdout) = spawn_cat();
        entry.terminate().await;
        let before = entry.last_used();

        let err = InputChannel::new().send(&entry, "hello").await.unwrap_err();
        assert!(err.is_not_running());
        assert_eq!(entry.last_used(), before);
    }

    #[tokio::test]
    async fn test_cancelled_send_leaves_process_running() {
        let (entry, _stdout) = spawn_cat();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = InputChannel::new()
            .send_with_cancel(&entry, "hello", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Process(ProcessError::SendCancelled { .. })));
        assert!(entry.is_running());
        entry.terminate().await;
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (entry, stdout) = spawn_cat();
        let entry = std::sync::Arc::new(entry);
        let line_a = "a".repeat(4096);
        let line_b = "b".repeat(4096);

        let channel = InputChannel::new();
        let (ra, rb) = tokio::join!(channel.send(&entry, &line_a), channel.send(&entry, &line_b));
        ra.unwrap();
        rb.unwrap();

        let mut lines = BufReader::new(stdout).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        let second = lines.next_line().await.unwrap().unwrap();
        let mut got = vec![first, second];
        got.sort();
        assert_eq!(got, vec![line_a, line_b]);
        entry.terminate().await;
    }

    #[tokio::test]
    async fn test_cancel_during_write_still_finishes_the_line() {
        let (entry, stdout) = spawn_slow_cat();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            let second = lines.next_line().await.unwrap().unwrap();
            (first, second)
        });

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let big = "x".repeat(1 << 20);
        let channel = InputChannel::new();
        channel.send_with_cancel(&entry, &big, &cancel).await.unwrap();
        channel.send(&entry, "hello").await.unwrap();

        let (first, second) = reader.await.unwrap();
        assert_eq!(first.len(), big.len());
        assert_eq!(second, "hello");
        entry.terminate().await;
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_another_sender() {
        let (entry, stdout) = spawn_cat();
        let held = entry.stdin().lock().await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let before = entry.last_used();
        let err = InputChannel::new()
            .send_with_cancel(&entry, "dropped", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Process(ProcessError::SendCancelled { .. })));
        assert_eq!(entry.last_used(), before);
        drop(held);

        InputChannel::new().send(&entry, "hello").await.unwrap();
        let mut lines = BufReader::new(stdout).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        entry.terminate().await;
    }

    #[tokio::test]
    async fn test_abandoned_write_closes_stdin() {
        let (entry, _stdout) = spawn_slow_cat();
        let big = "x".repeat(1 << 20);
        let channel = InputChannel::new();

        let abandoned = tokio::time::timeout(Duration::from_millis(100), channel.send(&entry, &big)).await;
        assert!(abandoned.is_err());

        let err = channel.send(&entry, "hello").await.unwrap_err();
        assert!(err.is_not_running());
        entry.terminate().await;
    }
}
