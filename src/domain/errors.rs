//! Domain errors for the warden lifecycle subsystem.
//!
//! Flow-control outcomes (open circuits, rate limits, debounced false
//! positives, deferred cleanups) are modelled as decision enums in the
//! services layer and never appear here.

use thiserror::Error;

use super::models::AllocationStatus;

/// Errors raised by persistence adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Malformed persisted state: {0}")]
    Serialization(String),

    #[error("Invalid record key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by the token ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient budget: requested {requested} tokens, {available} available")]
    InsufficientBudget { requested: u64, available: u64 },

    #[error("Allocation not found for worker {0}")]
    AllocationNotFound(String),

    #[error("Allocation for worker {worker_id} is {status}, expected {expected}")]
    InvalidAllocationState {
        worker_id: String,
        status: AllocationStatus,
        expected: AllocationStatus,
    },

    #[error("Allocation already exists for worker {0}")]
    DuplicateAllocation(String),

    #[error("Timed out after {0}ms waiting for the ledger lock")]
    LockTimeout(u64),

    #[error("Ledger counters are inconsistent: {0}")]
    Inconsistent(String),

    #[error("Ledger persistence failed: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Whether the caller may simply retry or report the failure.
    ///
    /// Lock timeouts and persistence failures abort the current operation,
    /// as does a persisted record whose counters do not add up. Everything
    /// else is an ordinary admission decision.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBudget { .. }
                | Self::AllocationNotFound(_)
                | Self::InvalidAllocationState { .. }
                | Self::DuplicateAllocation(_)
        )
    }
}

/// Errors raised by process-control adapters.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: i32, message: String },

    #[error("Process {pid} still running after forced kill")]
    Unkillable { pid: i32 },

    #[error("Process lookup failed: {0}")]
    Lookup(String),
}

/// Errors that abort the termination pipeline for a single worker.
///
/// Token-return and archival failures are logged inside the pipeline and
/// never surface as a `CleanupError`.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Process termination failed for {worker_id}: {source}")]
    ProcessTermination {
        worker_id: String,
        #[source]
        source: ProcessError,
    },

    #[error("State transition failed for {worker_id}: {source}")]
    StateTransition {
        worker_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Worker store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised when admitting a new worker.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Failed to persist worker record: {0}")]
    Store(#[from] StoreError),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),
}
