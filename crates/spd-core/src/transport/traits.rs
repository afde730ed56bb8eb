//! Serial transport abstraction.
//!
//! Defines the `SerialTransport` trait for the programmer's serial link,
//! allowing different implementations (serialport, mock, etc.).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Write timed out after {timeout_ms}ms")]
    WriteTimeout { timeout_ms: u64 },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Port is closed")]
    Closed,

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Errors a retry on the same open port can get past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. }
                | TransportError::WriteTimeout { .. }
                | TransportError::ReadFailed(_)
        )
    }
}

/// Abstract serial transport interface.
///
/// This trait enables:
/// - Production implementation using serialport
/// - Mock implementation for unit testing
pub trait SerialTransport: Send {
    /// Write all bytes as one contiguous write.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Block until one byte is available or `timeout` elapses.
    fn read_byte(&mut self, timeout: Duration) -> Result<u8, TransportError>;

    /// Drop anything pending in the input and output buffers.
    fn discard_buffers(&mut self) -> Result<(), TransportError>;

    /// Release the port. Calling this more than once is harmless.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn port_name(&self) -> &str;
}
