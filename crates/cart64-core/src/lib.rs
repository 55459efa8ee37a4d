//! cart64-core: 64drive USB protocol implementation in Rust.
//!
//! This crate talks to the 64drive cartridge programmer over USB: it frames
//! commands, validates the version handshake, and moves ROM/save images to
//! and from the device's memory banks in adaptively sized bulk chunks.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, command framing, bank/CIC types, version info
//! - **Transport**: Raw USB link abstraction (FTDI-over-nusb, mock)
//! - **Transfer**: Chunked upload/download engine with bounded retry
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator owning the handshake result
//!
//! # Example
//!
//! ```no_run
//! use cart64_core::{Bank, DeviceSession, SessionConfig};
//!
//! let mut session = DeviceSession::open(&SessionConfig::default())?;
//! let mut rom = std::fs::File::open("game.z64")?;
//! session.upload(&mut rom, None, 0, Bank::CartRom)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod error;
pub mod events;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod transfer;
pub mod transport;

// Re-exports for convenience
pub use error::DeviceError;
pub use events::{
    NullObserver, SessionEvent, SessionObserver, TracingObserver, TransferDirection,
};
pub use protocol::{Bank, Cic, CommandError, CommandFrame, VersionInfo};
pub use session::{DeviceSession, SessionConfig};
pub use transfer::{chunk_size_for, download, upload};
pub use transport::{
    FtdiDeviceListing, FtdiTransport, MockTransport, TransportError, UsbTransport,
    list_ftdi_devices,
};
