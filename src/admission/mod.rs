//! Admission control
//!
//! Every run passes the [`gate::AdmissionGate`] before any resource is
//! allocated for it.

pub mod gate;

pub use gate::{AdmissionGate, AdmissionTicket};
