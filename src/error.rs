//! Error types for the characterization pipeline
//!
//! Every error that can leave a driver call or `run_device` is one of these
//! variants. Cooperative cancellation has its own variant so callers can tell
//! an operator abort apart from a failing instrument.

use thiserror::Error;

use crate::driver::InstrumentError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum Error {
    /// The abort predicate fired; output was disabled before this was returned
    #[error("Measurement aborted: instrument output disabled")]
    InstrumentAborted,

    /// Error reported by the instrument transport, passed through untouched
    #[error("Instrument error: {0}")]
    Instrument(#[source] InstrumentError),

    /// A set-point or reading crossed one of the configured safety caps
    #[error("Safety limit exceeded: {0}\nOutput disabled, check thresholds before retrying")]
    SafetyLimit(String),

    /// Invalid operation parameters (non-finite, non-positive step, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A trace violated the equal-length / monotonic-time invariant
    #[error("Invalid trace: {0}")]
    InvalidTrace(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for cooperative cancellation.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::InstrumentAborted)
    }
}
