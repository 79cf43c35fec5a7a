//! codebox: run untrusted Python and Node.js code as a fixed low-privilege user
//!
//! Code is smuggled into a privilege-dropping launcher, executed under a
//! wall-clock deadline in its own process group, and its output streamed back
//! through a race-free drain-after-done protocol. A two-layer admission gate
//! keeps the host from being overwhelmed.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: JSON config with `SANDBOX_*` environment overrides
//! - [`config::types`]: Run requests, options and the error taxonomy
//! - [`config::validator`]: Run-option validation and normalisation
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::identity`]: The sandbox account, resolved or created at startup
//! - [`kernel::process_group`]: Process-group termination
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::workspace`]: Scoped workspaces removed on every exit path
//! - [`safety::safe_cleanup`]: Symlink-safe recursive removal
//!
//! ## Code Bootstrap ([`bootstrap`])
//! - [`bootstrap::key`]: One-time 512-bit execution keys
//! - [`bootstrap::payload`]: XOR + base64 payload obfuscation
//! - [`bootstrap::template`]: Per-language launcher rendering
//!
//! ## Execution Control ([`exec`])
//! - [`exec::context`]: Cancellable run context
//! - [`exec::capture`]: Streaming output capture with timeout and exit hook
//!
//! ## Runners ([`runner`])
//! - [`runner::adapter`]: Language runner contract
//! - [`runner::languages`]: Python and Node.js runners
//! - [`runner::registry`]: Language to runner lookup
//!
//! ## Admission ([`admission`])
//! - [`admission::gate`]: In-flight counter plus worker semaphore
//!
//! ## Provisioning ([`provision`])
//! - [`provision::provisioner`]: Staging-area construction and package install
//! - [`provision::staging`]: Lease/refresh exclusion
//! - [`provision::refresher`]: Periodic background refresh
//! - [`provision::dependencies`]: Requirements listing
//!
//! ## Service ([`service`])
//! - [`service::SandboxService`]: Request handling and response envelopes
//!
//! # Lifecycle of a run
//!
//! 1. Admission: fast reject when saturated, otherwise wait for a worker
//! 2. Options validated; preload dropped unless enabled
//! 3. Staging area leased (re-provisioned first when missing)
//! 4. Launcher staged with an obfuscated payload; key passed as an argument
//! 5. Interpreter spawned with an empty environment, output streamed
//! 6. Launcher deleted, lease and admission released

// Configuration
pub mod config;

// Kernel Primitives
pub mod kernel;

// Safety & Cleanup
pub mod safety;

// Code Bootstrap
pub mod bootstrap;

// Execution Control
pub mod exec;

// Language runners
pub mod runner;

// Admission control
pub mod admission;

// Staging areas and dependencies
pub mod provision;

// Service façade
pub mod service;

// CLI entrypoint wiring for the codebox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
