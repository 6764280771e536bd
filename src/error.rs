//! Custom error types for the data logger.
//!
//! `DaqError` is the single error type returned by the library. Errors fall
//! into two groups:
//!
//! - **Per-line** errors ([`MalformedRecord`]) are recoverable. The session
//!   drops the offending line, reports it, and keeps reading.
//! - **Session-fatal** errors (`TransportUnavailable`, `Storage`, `Io`,
//!   `UnexpectedFailure`) move the session to `FAILED`. The sink is still closed
//!   before the error reaches the caller.
//!
//! Configuration errors (`Config`, `Configuration`) happen before a session
//! exists and never touch the device.

use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Errors produced by the acquisition pipeline.
#[derive(Error, Debug)]
pub enum DaqError {
    /// A data line could not be turned into a sample.
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecord),

    /// The serial transport could not be opened or failed mid-session.
    #[error("Serial transport '{port}' unavailable: {source}")]
    TransportUnavailable {
        /// Port identifier the failure relates to.
        port: String,
        /// Underlying I/O cause.
        #[source]
        source: std::io::Error,
    },

    /// The record file rejected a write or flush.
    #[error("Storage error: {0}")]
    Storage(#[from] csv::Error),

    /// File system error outside of CSV encoding.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but holds an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Anything the session did not anticipate.
    #[error("Unexpected failure: {0}")]
    UnexpectedFailure(String),
}

impl DaqError {
    /// Builds a `TransportUnavailable` for `port`.
    pub fn transport(port: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        DaqError::TransportUnavailable {
            port: port.into(),
            source: source.into(),
        }
    }
}

/// A data line that does not match `<integer>,<real>`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed record '{raw}': {reason}")]
pub struct MalformedRecord {
    /// The trimmed line as received.
    pub raw: String,
    /// Why the line was rejected.
    pub reason: MalformedReason,
}

/// Cause of a [`MalformedRecord`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedReason {
    /// The line did not split into exactly two fields.
    #[error("expected 2 comma-separated fields, found {0}")]
    FieldCount(usize),

    /// Field 0 is not an integer.
    #[error("input field is not an integer: {0}")]
    Input(ParseIntError),

    /// Field 1 is not a real number.
    #[error("output field is not a number: {0}")]
    Output(ParseFloatError),
}

impl MalformedRecord {
    pub(crate) fn new(raw: &str, reason: MalformedReason) -> Self {
        Self {
            raw: raw.to_string(),
            reason,
        }
    }

    /// True when the field count was wrong, false for numeric failures.
    pub fn is_shape_error(&self) -> bool {
        matches!(self.reason, MalformedReason::FieldCount(_))
    }
}
