//! Configuration & option policy
//!
//! - [`types`]: error taxonomy and run request types
//! - [`loader`]: config.json loading with `SANDBOX_*` overrides
//! - [`validator`]: per-run option validation

pub mod loader;
pub mod types;
pub mod validator;
