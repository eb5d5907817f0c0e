//! Error types for rfidwire.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all driver operations.
///
/// Frame-level problems (bad checksum, frames that are not tag reads) never
/// surface here; they are reported through [`DriverEvent`](crate::DriverEvent)s
/// and `tracing`. Only caller-visible failures are errors.
#[derive(Debug, Error)]
pub enum RfidError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial port could not be opened or configured.
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Protocol error (malformed reply, unexpected command, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A caller-supplied value is outside what the reader accepts.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// No matching reply arrived before the deadline.
    #[error("No response within {waited:?}")]
    Timeout {
        /// How long the correlator waited.
        waited: Duration,
    },

    /// Reader or writer task has terminated.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The active reader model has no wire encoding for this operation.
    #[error("{operation} is not supported by the {protocol} protocol")]
    Unsupported {
        /// Protocol name.
        protocol: &'static str,
        /// Operation that was requested.
        operation: &'static str,
    },

    /// The operation requires an idle inventory session.
    #[error("Inventory session is running")]
    SessionActive,

    /// The reader answered with a failure status.
    #[error("Reader rejected command 0x{command:04X} with status 0x{code:02X}")]
    Rejected {
        /// Command (VMR64) or category/message-id (NATION) that was rejected.
        command: u16,
        /// Status code reported by the reader.
        code: u8,
    },
}

/// Result type alias using RfidError.
pub type Result<T> = std::result::Result<T, RfidError>;
