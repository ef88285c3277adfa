//! Output pumps: one task per process reading stdout into the normalizer.
//!
//! Events for a process are produced by a single task, so they reach the
//! dispatcher in exactly the order the process wrote them.

use crate::core::ProcessKey;
use crate::dispatch::EventDispatcher;
use crate::events::UnifiedCliEvent;
use crate::normalizer::OutputNormalizer;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Read size for output chunks.
const READ_CHUNK_SIZE: usize = 8 * 1024;

struct StreamState<R> {
    reader: R,
    normalizer: OutputNormalizer,
    pending: VecDeque<UnifiedCliEvent>,
    buf: Vec<u8>,
    finished: bool,
}

/// Turn any byte source into a stream of normalized events.
///
/// Events are yielded as soon as the bytes completing them arrive. At end of
/// input (or on a read error) the normalizer is flushed.
///
/// ```rust
/// use futures::StreamExt;
/// use persistent_cli::normalizer::OutputNormalizer;
/// use persistent_cli::process::output::event_stream;
///
/// # #[tokio::main]
/// # async fn main() {
/// let input: &[u8] = b"# Heading\nbody\n";
/// let events: Vec<_> = event_stream(input, OutputNormalizer::plain()).collect().await;
/// assert_eq!(events.last().unwrap().content(), Some("# Heading\nbody\n"));
/// # }
/// ```
pub fn event_stream<R>(reader: R, normalizer: OutputNormalizer) -> impl Stream<Item = UnifiedCliEvent> + Send
where
    R: AsyncRead + Unpin + Send,
{
    let state = StreamState {
        reader,
        normalizer,
        pending: VecDeque::new(),
        buf: vec![0u8; READ_CHUNK_SIZE],
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            match state.reader.read(&mut state.buf).await {
                Ok(0) => {
                    state.finished = true;
                    state.pending.extend(state.normalizer.finish());
                }
                Ok(n) => {
                    trace!(bytes = n, "Read output chunk");
                    let events = state.normalizer.push_chunk(&state.buf[..n]);
                    state.pending.extend(events);
                }
                Err(e) => {
                    warn!("Output read failed: {}", e);
                    state.finished = true;
                    state.pending.extend(state.normalizer.finish());
                }
            }
        }
    })
}

/// Spawn the task that forwards a process's stdout to `dispatcher`.
pub fn spawn_output_pump<R>(
    key: ProcessKey,
    stdout: R,
    normalizer: OutputNormalizer,
    dispatcher: Arc<dyn EventDispatcher>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut events = Box::pin(event_stream(stdout, normalizer));
        let mut count = 0usize;
        while let Some(event) = events.next().await {
            count += 1;
            dispatcher.dispatch(&key, event).await;
        }
        debug!(key = %key, events = count, "Output stream closed");
    })
}

/// Spawn the task that logs a process's stderr line by line.
pub fn spawn_stderr_logger<R>(key: ProcessKey, stderr: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => debug!(key = %key, "stderr: {}", line),
                Ok(None) => break,
                Err(e) => {
                    debug!(key = %key, "stderr read failed: {}", e);
                    break;
                }
            }
        }
    })
}
