//! Process lifecycle: launching, registry, idle eviction, input and output.
//!
//! ```text
//! acquire ──► ProcessRegistry ──► Launcher ──► child process
//!                  │                               │ stdout
//!             IdleReaper                     output pump ──► OutputNormalizer ──► EventDispatcher
//!                                                  ▲ stdin
//!                                           InputChannel
//! ```
//!
//! The registry owns every [`ProcessEntry`]. Callers borrow an `Arc` for a
//! send and never dispose of it. Entries leave the registry through
//! [`ProcessRegistry::evict_session`], [`ProcessRegistry::sweep_idle`] or
//! [`ProcessRegistry::shutdown`], and teardown is always best-effort.

pub mod entry;
pub mod input;
pub mod launcher;
pub mod output;
pub mod reaper;
pub mod registry;

pub use entry::{ProcessEntry, ProcessInfo};
pub use input::InputChannel;
pub use launcher::{LaunchSpec, LaunchedProcess, Launcher, ProcessLauncher};
pub use reaper::IdleReaper;
pub use registry::{ProcessRegistry, RegistryOptions};
