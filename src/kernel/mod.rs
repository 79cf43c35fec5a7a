//! Kernel-facing primitives
//!
//! - [`identity`]: the unprivileged account sandboxed code runs as
//! - [`process_group`]: forced termination of a run's process group

pub mod identity;
pub mod process_group;
