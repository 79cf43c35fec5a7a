//! Execution control
//!
//! Runs a prepared command under a deadline and a cancellable context,
//! streaming its output back to the caller.

pub mod capture;
pub mod context;

pub use capture::{CollectedOutput, ExitReport, OutputCapture, OutputEvent, OutputStreams, StreamState};
pub use context::{CancelHandle, RunContext};
