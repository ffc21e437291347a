//! Domain layer for the warden lifecycle subsystem
//!
//! Core records, their invariants, and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{AdmissionError, CleanupError, LedgerError, ProcessError, StoreError};
