//! Transport module - raw USB link to the device.

pub mod ftdi;
pub mod mock;
pub mod traits;

pub use ftdi::{FtdiDeviceListing, FtdiTransport, list_ftdi_devices};
pub use mock::MockTransport;
pub use traits::{TransportError, UsbTransport};
