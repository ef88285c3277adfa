//! Result type alias for persistent CLI operations.
//!
//! # Examples
//!
//! ```rust
//! use persistent_cli::Result;
//!
//! fn resolve_tool() -> Result<String> {
//!     Ok("codex".to_string())
//! }
//! ```

/// Result type alias defaulting to the crate's [`Error`](crate::Error).
///
/// The error parameter can still be overridden where a different error type
/// is more natural:
///
/// ```rust
/// use persistent_cli::Result;
///
/// fn with_io_error() -> Result<u32, std::io::Error> {
///     Ok(7)
/// }
/// ```
pub type Result<T, E = crate::Error> = std::result::Result<T, E>;
