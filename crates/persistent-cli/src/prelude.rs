//! Prelude module for convenient imports.
//!
//! ```rust
//! use persistent_cli::prelude::*;
//!
//! let key = ProcessKey::new(SessionId::new("s-1"), ToolId::new("codex"));
//! assert_eq!(key.to_string(), "s-1:codex");
//! ```

pub use crate::config::{RuntimeConfig, ToolDescriptor};
pub use crate::core::{ProcessKey, SessionId, ToolId};
pub use crate::dispatch::{ChannelDispatcher, DispatchedEvent, EventDispatcher, NullDispatcher};
pub use crate::env::{EnvironmentResolver, EnvironmentStore, InMemoryEnvironmentStore};
pub use crate::error::{ConfigError, Error, LaunchError, ProcessError};
pub use crate::events::{EventPayload, TokenUsage, UnifiedCliEvent, event_types, item_types};
pub use crate::normalizer::{AdapterKind, OutputMode, OutputNormalizer};
pub use crate::process::{InputChannel, LaunchSpec, ProcessEntry, ProcessRegistry, RegistryOptions};
pub use crate::result::Result;
pub use crate::session::{CliSessionContext, SessionHost};
