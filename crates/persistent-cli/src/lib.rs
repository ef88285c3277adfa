//! # Persistent CLI sessions for Rust
//!
//! Drive interactive command-line coding assistants (Codex, Claude Code, ...)
//! from a web session while keeping one long-lived process per
//! (session, tool) pair, and turn their heterogeneous output into one event
//! model.
//!
//! ## Features
//!
//! - **Process Registry**: Reuse, relaunch, session eviction and idle sweep of tool processes
//! - **Single-Flight Launch**: Concurrent first use of a key starts exactly one process
//! - **Serialized Input**: Prompts to one process never interleave
//! - **Output Normalization**: JSONL adapters for Codex and Claude Code, plus plain-text streaming
//! - **Environment Resolution**: Static defaults layered under stored overrides, blank values ignored
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use persistent_cli::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = RuntimeConfig::load().await?;
//!     let (dispatcher, mut events) = ChannelDispatcher::new();
//!     let host = SessionHost::start(config, None, Arc::new(dispatcher));
//!
//!     let session = SessionId::generate();
//!     host.send_prompt(&session, &ToolId::new("codex"), "Explain this repo").await?;
//!
//!     while let Some(dispatched) = events.recv().await {
//!         println!("{}: {:?}", dispatched.event.event_type, dispatched.event.content());
//!         if dispatched.event.event_type == "turn.completed" {
//!             break;
//!         }
//!     }
//!
//!     host.end_session(&session).await;
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Normalizing Canned Output
//!
//! The normalizer holds no process state and works on plain strings:
//!
//! ```rust
//! use persistent_cli::normalizer::{OutputNormalizer, codex::CodexAdapter};
//!
//! let mut normalizer = OutputNormalizer::jsonl(Box::new(CodexAdapter));
//! let events = normalizer.normalize_line(r#"{"type":"something.new","foo":"bar"}"#);
//! assert!(events[0].is_unknown);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod core;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod events;
pub mod normalizer;
pub mod prelude;
pub mod process;
pub mod result;
pub mod session;

pub use error::{ConfigError, Error, LaunchError, ProcessError};
pub use result::Result;

pub use config::{RuntimeConfig, ToolDescriptor};
pub use core::{ProcessKey, SessionId, ToolId};
pub use dispatch::{ChannelDispatcher, DispatchedEvent, EventDispatcher, NullDispatcher};
pub use env::{EnvironmentResolver, EnvironmentStore, InMemoryEnvironmentStore};
pub use events::{EventPayload, TokenUsage, UnifiedCliEvent};
pub use normalizer::{AdapterKind, OutputMode, OutputNormalizer};
pub use process::{
    IdleReaper, InputChannel, LaunchSpec, ProcessEntry, ProcessInfo, ProcessLauncher,
    ProcessRegistry, RegistryOptions,
};
pub use session::{CliSessionContext, SessionHost};
