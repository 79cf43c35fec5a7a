//! Safety and cleanup
//!
//! Scoped workspaces and symlink-safe removal. Every path created for a run is
//! removed on every exit path.

pub mod safe_cleanup;
pub mod workspace;

pub use workspace::{with_temp_dir, ScopedWorkspace};
