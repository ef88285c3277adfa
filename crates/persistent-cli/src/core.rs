//! Identifier types shared across the crate.
//!
//! Session and tool identifiers are opaque, caller-supplied strings. They are
//! wrapped in newtypes so a tool id can never be passed where a session id is
//! expected, and combined into a [`ProcessKey`] that names exactly one slot in
//! the process registry.
//!
//! # Examples
//!
//! ```rust
//! use persistent_cli::core::{ProcessKey, SessionId, ToolId};
//!
//! let key = ProcessKey::new(SessionId::new("s-1"), ToolId::new("codex"));
//! assert_eq!(key.to_string(), "s-1:codex");
//! assert!(key.belongs_to(&SessionId::new("s-1")));
//! ```

use std::fmt;

/// Separator between the session and tool components of a key's textual form.
pub const KEY_SEPARATOR: char = ':';

/// Newtype wrapper for web session IDs.
///
/// # Examples
///
/// ```rust
/// use persistent_cli::core::SessionId;
///
/// let session_id = SessionId::new("abc123");
/// assert_eq!(session_id.as_str(), "abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new session ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random session ID (UUID v4).
    #[inline]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the session ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert into the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// A session ID is valid when it is non-empty and does not contain the
    /// key separator, which would make prefix-based eviction ambiguous.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.contains(KEY_SEPARATOR)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Newtype wrapper for tool IDs (`codex`, `claude-code`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ToolId(String);

impl ToolId {
    /// Create a new tool ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the tool ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ToolId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ToolId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ToolId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Composite registry key: one slot per (session, tool) pair.
///
/// Equality and hashing are structural over both components, so two keys
/// whose textual forms collide (`"a:b" + "c"` vs `"a" + "b:c"`) remain
/// distinct inside the registry. The textual form `"{session}:{tool}"` is
/// kept for logs and external correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ProcessKey {
    session_id: SessionId,
    tool_id: ToolId,
}

impl ProcessKey {
    /// Build a key from its two components.
    pub fn new(session_id: impl Into<SessionId>, tool_id: impl Into<ToolId>) -> Self {
        Self {
            session_id: session_id.into(),
            tool_id: tool_id.into(),
        }
    }

    /// Session component.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Tool component.
    pub fn tool_id(&self) -> &ToolId {
        &self.tool_id
    }

    /// Whether this key's session component equals `session_id` exactly.
    pub fn belongs_to(&self, session_id: &SessionId) -> bool {
        self.session_id == *session_id
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.session_id, KEY_SEPARATOR, self.tool_id)
    }
}
