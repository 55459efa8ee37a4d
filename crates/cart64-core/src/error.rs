//! Crate-level error type for device operations.

use thiserror::Error;

use crate::events::TransferDirection;
use crate::protocol::CommandError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(
        "Communication failure after {attempts} handshake attempts.\n\
         Unplug the USB cable, turn off the N64, then try again."
    )]
    CommunicationFailure { attempts: u32 },

    #[error("Hardware revision {variant} does not support changing CIC mode")]
    CapabilityUnsupported { variant: String },

    #[error(
        "{direction} stalled after {attempts} attempts ({bytes_transferred} bytes moved): {source}"
    )]
    RetryExhausted {
        direction: TransferDirection,
        attempts: u32,
        /// Bytes successfully moved before the failing chunk, so a caller
        /// can resume from the last known offset.
        bytes_transferred: u64,
        source: TransportError,
    },

    #[error("Version info not populated; run the handshake first")]
    HandshakeRequired,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Bytes moved before the error, when the operation tracks progress.
    pub fn bytes_transferred(&self) -> Option<u64> {
        match self {
            DeviceError::RetryExhausted {
                bytes_transferred, ..
            } => Some(*bytes_transferred),
            _ => None,
        }
    }
}
