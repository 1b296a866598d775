//! Error types for samflash.

use std::io;
use thiserror::Error;

/// Result type for samflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for samflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed to write, drain or read.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Serial port error while opening or configuring the port.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A strict read did not receive enough bytes before its deadline.
    ///
    /// The buffered bytes have been discarded.
    #[error("Read timed out with {available} of {requested} bytes (buffer discarded)")]
    Timeout {
        /// Number of bytes the request asked for.
        requested: usize,
        /// Number of bytes that had arrived when the deadline passed.
        available: usize,
    },

    /// The flash controller did not report ready within the poll budget.
    #[error("Flash controller plane {plane} not ready after {attempts} polls")]
    NotReady {
        /// Plane that was being polled.
        plane: u32,
        /// Number of poll attempts made.
        attempts: u32,
    },

    /// The flash controller status register reported an error.
    #[error("Flash controller error on plane {plane} (FSR = {status:#010x})")]
    Controller {
        /// Plane whose status register reported the error.
        plane: u32,
        /// Raw status register value.
        status: u32,
    },

    /// Read-back of a programmed page did not match.
    #[error("Verification failed at page {page}")]
    VerifyFailed {
        /// Page index that failed verification.
        page: u32,
    },

    /// Chip identifier is not in the profile registry.
    #[error("Unknown chip id {0:#010x}")]
    UnknownChip(u32),

    /// Operation invoked without the setup it depends on.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied an out-of-range page or oversized data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is a strict read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
