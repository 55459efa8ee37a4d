//! USB transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for raw link I/O, allowing different
//! implementations (FTDI-over-nusb, mock, etc.). The protocol engine only
//! ever talks to this trait.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X}")]
    DeviceNotFound { vid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Control request 0x{request:02X} failed: {message}")]
    ControlFailed { request: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Link made no progress")]
    Stalled,

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract raw transport to the device.
///
/// This trait enables:
/// - Production implementation over nusb (FTDI FIFO)
/// - Mock implementation for unit testing
pub trait UsbTransport: Send + Sync {
    /// Write raw bytes to the OUT endpoint. Returns the number of bytes
    /// actually accepted, which may be short.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read raw bytes from the IN endpoint into `buf`. Returns the number
    /// of payload bytes read; 0 means the link produced no data.
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Discard anything buffered on the link, both directions.
    fn purge(&self) -> Result<(), TransportError>;

    /// Negotiate the link layer's internal bulk chunking to match the
    /// engine's transfer chunk size.
    fn set_chunk_size(&self, bytes: usize) -> Result<(), TransportError>;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;

    /// Read until `buf` is full. A read that makes no progress fails with
    /// [`TransportError::Stalled`] rather than spinning.
    fn read_exact(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(TransportError::Stalled);
            }
            filled += n;
        }
        Ok(())
    }
}
