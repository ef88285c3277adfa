//! Boundary to whatever renders events.
//!
//! The dispatcher receives every normalized event together with the key of
//! the process that produced it. Correlation, persistence and rendering are
//! its concern. Implementations must tolerate `is_unknown` and `is_error`
//! events.

use crate::core::ProcessKey;
use crate::events::UnifiedCliEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

/// Consumer of normalized events.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Deliver one event. Called in output order for each process.
    async fn dispatch(&self, key: &ProcessKey, event: UnifiedCliEvent);
}

/// An event tagged with its source.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    /// Producing process.
    pub key: ProcessKey,
    /// The event.
    pub event: UnifiedCliEvent,
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<DispatchedEvent>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventDispatcher for ChannelDispatcher {
    async fn dispatch(&self, key: &ProcessKey, event: UnifiedCliEvent) {
        if self
            .tx
            .send(DispatchedEvent {
                key: key.clone(),
                event,
            })
            .is_err()
        {
            trace!(key = %key, "Event receiver dropped");
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDispatcher;

#[async_trait]
impl EventDispatcher for NullDispatcher {
    async fn dispatch(&self, key: &ProcessKey, event: UnifiedCliEvent) {
        trace!(key = %key, event_type = %event.event_type, "Discarding event");
    }
}
