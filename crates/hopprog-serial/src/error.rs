//! Error types for programmer operations

use std::time::Duration;

use hopprog_core::CodecError;
use thiserror::Error;

use crate::protocol::Step;

/// Coarse error category
///
/// Transport errors are fatal to the connection; protocol errors abort the
/// current operation only; codec errors never touch the device; usage errors
/// are rejected before any I/O happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Port open/read/write failure
    Transport,
    /// Unexpected or missing response line
    Protocol,
    /// Wire image encode/decode failure
    Codec,
    /// Operation invoked in the wrong state or with bad arguments
    Usage,
}

/// Programmer errors
#[derive(Debug, Error)]
pub enum ProgrammerError {
    /// Failed to open or keep the transport
    #[error("Transport error: {0}")]
    TransportError(String),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device answered with something other than the expected line
    #[error("Unexpected response: {0:?}")]
    UnexpectedResponse(String),

    /// No (valid) response line arrived in time
    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    /// Info line was JSON but not the expected structure
    #[error("Failed to decode programmer info: {0}")]
    DecodeError(String),

    /// Wire image error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Operation requires an open connection
    #[error("Not connected")]
    NotConnected,

    /// A connection is already open
    #[error("Already connected")]
    AlreadyConnected,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Request was superseded by a newer request of the same kind
    #[error("{0} request superseded by a newer one")]
    Cancelled(&'static str),

    /// A step of the program workflow failed; later steps were not run
    #[error("{step} failed: {source}")]
    StepFailed {
        /// The step that failed
        step: Step,
        /// Why it failed
        #[source]
        source: Box<ProgrammerError>,
    },
}

impl ProgrammerError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransportError(_) | Self::Io(_) | Self::Serial(_) => ErrorKind::Transport,
            Self::UnexpectedResponse(_) | Self::Timeout(_) | Self::DecodeError(_) => {
                ErrorKind::Protocol
            }
            Self::Codec(_) => ErrorKind::Codec,
            Self::NotConnected
            | Self::AlreadyConnected
            | Self::InvalidParameter(_)
            | Self::Cancelled(_) => ErrorKind::Usage,
            Self::StepFailed { source, .. } => source.kind(),
        }
    }

    /// Whether this error closes the connection
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

/// Result type for programmer operations
pub type Result<T> = std::result::Result<T, ProgrammerError>;
