//! FTDI FIFO transport over nusb.
//!
//! The 64drive enumerates as a stock FTDI high-speed FIFO (FT232H on HW2,
//! FT2232H on HW1), so the raw link is plain bulk I/O plus a handful of
//! FTDI vendor control requests: reset, bitmode, latency timer, and buffer
//! purge. The chip prepends two modem-status bytes to every USB packet it
//! sends; reads strip those before handing payload to the engine.

use std::sync::Mutex;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::constants::{FTDI_VENDOR_ID, SUPPORTED_DEVICES};

// FTDI vendor requests, as defined by the FT232H/FT2232H datasheets.
const SIO_RESET_REQUEST: u8 = 0x00;
const SIO_SET_LATENCY_TIMER_REQUEST: u8 = 0x09;
const SIO_SET_BITMODE_REQUEST: u8 = 0x0B;

const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;

const BITMODE_RESET: u8 = 0x00;
const BITMODE_SYNCFF: u8 = 0x40;

/// wIndex addressing FTDI interface A.
const INTERFACE_A_INDEX: u16 = 1;

/// Maximum latency timer value; the device streams large bulk payloads, so
/// there is no reason to flush early.
const LATENCY_TIMER_MS: u8 = 255;

/// Bulk chunking before the engine negotiates its own.
const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Map a PID to the 64drive hardware version it identifies.
pub fn hw_version_for_pid(pid: u16) -> Option<u8> {
    SUPPORTED_DEVICES
        .iter()
        .find(|(known, _)| *known == pid)
        .map(|&(_, hw)| hw)
}

/// nusb-backed FTDI transport.
pub struct FtdiTransport {
    /// Kept so the USB device stays open for the interface's lifetime.
    _device: Device,
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    vid: u16,
    pid: u16,
    hw_version: u8,
    max_packet_size: usize,
    timeout: Duration,
    chunk_size: Mutex<usize>,
    /// Payload carried over from a bulk read after status stripping.
    leftover: Mutex<Vec<u8>>,
}

impl FtdiTransport {
    /// Open the first attached 64drive, newest hardware first, and run the
    /// FTDI init sequence (reset, sync FIFO on HW2, latency, purge).
    #[instrument(level = "info")]
    pub fn open(timeout: Duration) -> Result<Self, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            if device_info.vendor_id() != FTDI_VENDOR_ID {
                continue;
            }
            if let Some(hw_version) = hw_version_for_pid(device_info.product_id()) {
                return Self::open_device_info(device_info, hw_version, timeout);
            }
        }

        Err(TransportError::DeviceNotFound {
            vid: FTDI_VENDOR_ID,
        })
    }

    fn open_device_info(
        device_info: nusb::DeviceInfo,
        hw_version: u8,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            hw_version,
            "Found 64drive device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        // The ftdi_sio kernel driver grabs these devices on Linux; detach it.
        let interface = device
            .detach_and_claim_interface(0)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: 0,
                message: e.to_string(),
            })?;

        // Find BULK endpoints on interface A.
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;
        let mut max_packet_size: usize = 512;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == 0 {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == nusb::transfer::Direction::In {
                                    in_endpoint = ep.address();
                                    max_packet_size = ep.max_packet_size();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            max_packet_size,
            "Device opened"
        );

        let transport = Self {
            _device: device,
            interface,
            in_endpoint,
            out_endpoint,
            vid,
            pid,
            hw_version,
            max_packet_size,
            timeout,
            chunk_size: Mutex::new(DEFAULT_CHUNK_SIZE),
            leftover: Mutex::new(Vec::new()),
        };

        transport.init()?;
        Ok(transport)
    }

    /// Hardware version implied by the PID this transport matched (2 = FT232H,
    /// 1 = FT2232H).
    pub fn hw_version(&self) -> u8 {
        self.hw_version
    }

    /// FTDI init sequence the device firmware expects before any command.
    fn init(&self) -> Result<(), TransportError> {
        debug!("Resetting device");
        self.control_out(SIO_RESET_REQUEST, SIO_RESET_SIO)?;

        if self.hw_version == 2 {
            debug!("Setting synchronous FIFO mode");
            self.set_bitmode(0xFF, BITMODE_RESET)?;
            self.set_bitmode(0xFF, BITMODE_SYNCFF)?;
        }

        self.control_out(SIO_SET_LATENCY_TIMER_REQUEST, LATENCY_TIMER_MS as u16)?;

        debug!("Purging buffers");
        self.purge()
    }

    fn set_bitmode(&self, bitmask: u8, mode: u8) -> Result<(), TransportError> {
        let value = (bitmask as u16) | ((mode as u16) << 8);
        self.control_out(SIO_SET_BITMODE_REQUEST, value)
    }

    fn control_out(&self, request: u8, value: u16) -> Result<(), TransportError> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: INTERFACE_A_INDEX,
                    data: &[],
                },
                self.timeout,
            )
            .wait()
            .map_err(|e| TransportError::ControlFailed {
                request,
                message: e.to_string(),
            })?;
        Ok(())
    }
}

impl UsbTransport for FtdiTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let chunk_size = *self.chunk_size.lock().unwrap();
        let mut ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            let chunk = &data[offset..end];

            let mut transfer_buf = Buffer::new(chunk.len());
            transfer_buf.extend_from_slice(chunk);

            let completion = ep.transfer_blocking(transfer_buf, self.timeout);
            completion.status.map_err(|e| match e {
                nusb::transfer::TransferError::Disconnected => TransportError::Disconnected,
                other => TransportError::WriteFailed(other.to_string()),
            })?;

            if completion.actual_len == 0 {
                break;
            }
            offset += completion.actual_len;
        }

        debug!(bytes_written = offset, "Write complete");
        Ok(offset)
    }

    #[instrument(skip(self, buf), fields(want = buf.len()))]
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }

        {
            let mut leftover = self.leftover.lock().unwrap();
            if !leftover.is_empty() {
                let n = leftover.len().min(buf.len());
                buf[..n].copy_from_slice(&leftover[..n]);
                leftover.drain(..n);
                return Ok(n);
            }
        }

        // Request enough raw bytes that, after the 2 status bytes per packet
        // are stripped, the payload can fill `buf`.
        let packet = self.max_packet_size;
        let payload_per_packet = packet - 2;
        let raw_len = buf.len().div_ceil(payload_per_packet) * packet;

        let mut ep = self
            .interface
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let transfer_buf = Buffer::new(raw_len);
        let completion = ep.transfer_blocking(transfer_buf, self.timeout);
        completion.status.map_err(|e| match e {
            nusb::transfer::TransferError::Disconnected => TransportError::Disconnected,
            other => TransportError::ReadFailed(other.to_string()),
        })?;

        let actual_len = completion.actual_len;
        let mut raw = completion.buffer.into_vec();
        raw.truncate(actual_len);

        let payload = strip_modem_status(&mut raw, packet);
        if payload == 0 {
            return Ok(0);
        }

        let n = payload.min(buf.len());
        buf[..n].copy_from_slice(&raw[..n]);
        if payload > n {
            self.leftover
                .lock()
                .unwrap()
                .extend_from_slice(&raw[n..payload]);
        }

        debug!(bytes_read = n, "Read complete");
        Ok(n)
    }

    fn purge(&self) -> Result<(), TransportError> {
        self.leftover.lock().unwrap().clear();
        self.control_out(SIO_RESET_REQUEST, SIO_RESET_PURGE_RX)?;
        self.control_out(SIO_RESET_REQUEST, SIO_RESET_PURGE_TX)
    }

    fn set_chunk_size(&self, bytes: usize) -> Result<(), TransportError> {
        *self.chunk_size.lock().unwrap() = bytes.max(1);
        Ok(())
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// One attached FTDI-vendor device, for display purposes.
#[derive(Debug, Clone)]
pub struct FtdiDeviceListing {
    pub vid: u16,
    pub pid: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    /// Set when the PID is a known 64drive hardware revision.
    pub hw_version: Option<u8>,
}

/// Enumerate attached FTDI-vendor devices without opening any of them.
pub fn list_ftdi_devices() -> Result<Vec<FtdiDeviceListing>, TransportError> {
    let devices = list_devices()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    Ok(devices
        .filter(|d| d.vendor_id() == FTDI_VENDOR_ID)
        .map(|d| FtdiDeviceListing {
            vid: d.vendor_id(),
            pid: d.product_id(),
            manufacturer: d.manufacturer_string().map(str::to_owned),
            product: d.product_string().map(str::to_owned),
            serial: d.serial_number().map(str::to_owned),
            hw_version: hw_version_for_pid(d.product_id()),
        })
        .collect())
}

/// Strip the 2-byte modem status header from each max-packet in a raw bulk
/// read, compacting payload bytes in place. Returns the payload length.
fn strip_modem_status(data: &mut [u8], packet_size: usize) -> usize {
    let total = data.len();
    if total <= 2 {
        return 0;
    }

    let num_packets = total.div_ceil(packet_size);
    let mut write_pos = 0;

    for i in 0..num_packets {
        let pkt_start = i * packet_size;
        let pkt_end = (pkt_start + packet_size).min(total);
        let pkt_len = pkt_end - pkt_start;

        if pkt_len <= 2 {
            continue;
        }

        let payload_start = pkt_start + 2;
        let payload_len = pkt_len - 2;

        if write_pos != payload_start {
            data.copy_within(payload_start..payload_start + payload_len, write_pos);
        }
        write_pos += payload_len;
    }

    write_pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hw_version_lookup() {
        assert_eq!(hw_version_for_pid(0x6014), Some(2));
        assert_eq!(hw_version_for_pid(0x6010), Some(1));
        assert_eq!(hw_version_for_pid(0x6001), None);
    }

    #[test]
    fn test_strip_single_packet() {
        let mut data = vec![0x31, 0x60, b'a', b'b', b'c'];
        let n = strip_modem_status(&mut data, 512);
        assert_eq!(n, 3);
        assert_eq!(&data[..n], b"abc");
    }

    #[test]
    fn test_strip_across_packets() {
        // Two 8-byte packets, each starting with 2 status bytes.
        let mut data = vec![
            0x31, 0x60, 1, 2, 3, 4, 5, 6, //
            0x31, 0x60, 7, 8, 9,
        ];
        let n = strip_modem_status(&mut data, 8);
        assert_eq!(n, 9);
        assert_eq!(&data[..n], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_strip_status_only() {
        let mut data = vec![0x31, 0x60];
        assert_eq!(strip_modem_status(&mut data, 512), 0);
    }
}
