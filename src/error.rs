//! Error types for pagetree index files.

use std::io;
use thiserror::Error;

/// The result type used throughout pagetree.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for pagetree operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred while creating, writing or mapping a file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed attributes, records or a geometry that cannot be represented.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The queried key is provably absent from the index.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The writer was finished before all declared records were written.
    #[error("Expectation failed: {0}")]
    ExpectationFailed(String),

    /// The index would need more levels than the header can describe.
    #[error("Too many levels: {levels} exceeds the maximum of {max}")]
    TooManyLevels {
        /// The number of levels the layout required.
        levels: usize,
        /// The maximum number of levels supported.
        max: usize,
    },

    /// A record was put after the declared capacity was reached.
    #[error("Too many records: capacity of {capacity} already written")]
    TooManyRecords {
        /// The declared record count.
        capacity: u64,
    },

    /// The file content does not describe a valid index.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The header checksum did not match its content.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The stored checksum value.
        expected: u32,
        /// The computed checksum value.
        actual: u32,
    },

    /// The handle or file is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new expectation failed error.
    pub fn expectation_failed(msg: impl Into<String>) -> Self {
        Error::ExpectationFailed(msg.into())
    }

    /// Returns true if this error reports a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("test corruption");
        assert_eq!(err.to_string(), "Data corruption: test corruption");

        let err = Error::ChecksumMismatch { expected: 0x12345678, actual: 0x87654321 };
        assert!(err.to_string().contains("0x12345678"));
        assert!(err.to_string().contains("0x87654321"));

        let err = Error::TooManyLevels { levels: 33, max: 32 };
        assert_eq!(err.to_string(), "Too many levels: 33 exceeds the maximum of 32");

        let err = Error::TooManyRecords { capacity: 5 };
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::not_found("k").is_not_found());
        assert!(!Error::invalid_argument("k").is_not_found());
    }
}
