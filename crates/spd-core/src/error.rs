//! Error types for programmer operations.

use std::fmt;

use thiserror::Error;

use crate::protocol::Opcode;
use crate::transport::TransportError;

/// Which part of a frame the engine was waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Marker,
    Length,
    Payload,
    Checksum,
    AlertCode,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramePhase::Marker => write!(f, "marker"),
            FramePhase::Length => write!(f, "length"),
            FramePhase::Payload => write!(f, "payload"),
            FramePhase::Checksum => write!(f, "checksum"),
            FramePhase::AlertCode => write!(f, "alert code"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SpdError {
    /// Rejected locally, nothing was sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeout waiting for {phase} after {timeout_ms}ms")]
    Timeout { phase: FramePhase, timeout_ms: u64 },

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Firmware does not support the hardware for {command}")]
    UnsupportedHardware { command: Opcode },

    #[error("Device reported failure for {command}: {context}")]
    DeviceReportedFailure { command: Opcode, context: String },

    #[error("Unexpected response to {command}: {payload:02X?}")]
    UnexpectedResponse { command: Opcode, payload: Vec<u8> },

    #[error("Retries exhausted at offset 0x{offset:04X} after {attempts} attempts: {source}")]
    ExhaustedRetries {
        offset: usize,
        attempts: u32,
        source: Box<SpdError>,
    },

    #[error("Write aborted at offset 0x{offset:04X}: {errors} unrecoverable chunk errors")]
    TooManyErrors { offset: usize, errors: u32 },

    #[error("Operation cancelled at offset 0x{offset:04X}")]
    Cancelled { offset: usize },

    #[error("Programmer is not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SpdError {
    /// Whether a chunk-level retry may recover from this error.
    ///
    /// Argument and hardware-support errors are deterministic and a closed
    /// connection will not reopen itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            SpdError::Timeout { .. }
            | SpdError::ChecksumMismatch { .. }
            | SpdError::DeviceReportedFailure { .. }
            | SpdError::UnexpectedResponse { .. } => true,
            SpdError::Transport(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Byte offset the failure is attributed to, when there is one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            SpdError::ExhaustedRetries { offset, .. }
            | SpdError::TooManyErrors { offset, .. }
            | SpdError::Cancelled { offset } => Some(*offset),
            _ => None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        SpdError::InvalidArgument(message.into())
    }

    pub(crate) fn failure(command: Opcode, context: impl Into<String>) -> Self {
        SpdError::DeviceReportedFailure {
            command,
            context: context.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpdError>;
