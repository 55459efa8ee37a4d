//! Event system for UI decoupling.
//!
//! Progress and diagnostics are pushed through an observer instead of a
//! process-wide verbosity flag, so the CLI (or any other front end) decides
//! how to render them.

use std::fmt;

use crate::protocol::{Bank, Cic};

/// Direction of a bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

/// Events emitted by a device session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Device opened and claimed.
    DeviceOpened { vid: u16, pid: u16, hw_version: u8 },
    /// A handshake response carried the wrong magic word.
    HandshakeRejected { attempt: u32, magic: u32 },
    /// Handshake complete; the device identified itself.
    HandshakeComplete { variant: String, hw_version: u8 },
    /// A bulk transfer is starting.
    TransferStarted {
        direction: TransferDirection,
        total: u64,
        offset: u32,
        bank: Bank,
    },
    /// Progress after each chunk.
    TransferProgress {
        direction: TransferDirection,
        transferred: u64,
        total: u64,
    },
    /// A chunk is being retried after a link failure.
    TransferRetry {
        direction: TransferDirection,
        attempt: u32,
    },
    /// A bulk transfer finished.
    TransferComplete {
        direction: TransferDirection,
        bytes: u64,
    },
    /// A CIC mode was selected.
    CicSelected { cic: Cic },
}

/// Observer trait for receiving session events.
///
/// Implement this in the UI layer to render progress.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::DeviceOpened {
                vid,
                pid,
                hw_version,
            } => {
                tracing::info!(
                    vid = %format!("{:04X}", vid),
                    pid = %format!("{:04X}", pid),
                    hw_version,
                    "Device opened"
                );
            }
            SessionEvent::HandshakeRejected { attempt, magic } => {
                tracing::warn!(
                    attempt,
                    magic = %format!("0x{:08X}", magic),
                    "Handshake rejected"
                );
            }
            SessionEvent::HandshakeComplete {
                variant,
                hw_version,
            } => {
                tracing::info!(variant = %variant, hw_version, "Handshake complete");
            }
            SessionEvent::TransferStarted {
                direction,
                total,
                offset,
                bank,
            } => {
                tracing::info!(
                    direction = %direction,
                    total,
                    offset = %format!("0x{:06X}", offset),
                    bank = %bank,
                    "Transfer started"
                );
            }
            SessionEvent::TransferProgress {
                direction,
                transferred,
                total,
            } => {
                let pct = if *total > 0 {
                    (*transferred * 100) / *total
                } else {
                    0
                };
                tracing::debug!(direction = %direction, progress = %format!("{}%", pct), "Progress");
            }
            SessionEvent::TransferRetry { direction, attempt } => {
                tracing::warn!(direction = %direction, attempt, "Retrying chunk");
            }
            SessionEvent::TransferComplete { direction, bytes } => {
                tracing::info!(direction = %direction, bytes, "Transfer complete");
            }
            SessionEvent::CicSelected { cic } => {
                tracing::info!(cic = %cic, "CIC mode selected");
            }
        }
    }
}
