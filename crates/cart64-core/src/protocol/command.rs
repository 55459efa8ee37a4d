//! Command frame construction.
//!
//! Every request to the device is a fixed-format frame: one opcode byte,
//! the literal `CMD` tag, then up to seven parameters as big-endian u32.
//! The codec only builds the buffer; sending it is the transport's job.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::constants::{COMMAND_FRAME_CAPACITY, COMMAND_TAG, MAX_COMMAND_PARAMS};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error(
        "command 0x{opcode:02X} given {count} parameters, frame holds at most {MAX_COMMAND_PARAMS}"
    )]
    TooManyParameters { opcode: u8, count: usize },
}

/// An encoded command frame, backed by a fixed-capacity buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    buf: [u8; COMMAND_FRAME_CAPACITY],
    len: usize,
}

impl CommandFrame {
    /// Encode `opcode` plus `params` into a frame of exactly `4 + 4n` bytes.
    ///
    /// The parameter-count bound is checked here, before any I/O happens;
    /// exceeding it is a caller bug, not a device condition.
    pub fn new(opcode: u8, params: &[u32]) -> Result<Self, CommandError> {
        if params.len() > MAX_COMMAND_PARAMS {
            return Err(CommandError::TooManyParameters {
                opcode,
                count: params.len(),
            });
        }

        let mut buf = [0u8; COMMAND_FRAME_CAPACITY];
        buf[0] = opcode;
        buf[1..4].copy_from_slice(&COMMAND_TAG);
        for (i, &param) in params.iter().enumerate() {
            let at = 4 + i * 4;
            BigEndian::write_u32(&mut buf[at..at + 4], param);
        }

        Ok(Self {
            buf,
            len: 4 + params.len() * 4,
        })
    }

    pub fn opcode(&self) -> u8 {
        self.buf[0]
    }

    /// The wire bytes: opcode, tag, then each parameter big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{CMD_GETVER, CMD_PI_RD_32};

    #[test]
    fn test_single_param_frame() {
        let frame = CommandFrame::new(CMD_PI_RD_32, &[0x1000_0000]).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0x90, b'C', b'M', b'D', 0x10, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_no_param_frame() {
        let frame = CommandFrame::new(CMD_GETVER, &[]).unwrap();
        assert_eq!(frame.as_bytes(), &[0x80, b'C', b'M', b'D']);
        assert_eq!(frame.opcode(), CMD_GETVER);
    }

    #[test]
    fn test_params_are_big_endian() {
        let frame = CommandFrame::new(0x20, &[0x0012_3456, 0x01A0_0000]).unwrap();
        assert_eq!(frame.as_bytes().len(), 12);
        assert_eq!(&frame.as_bytes()[4..8], &[0x00, 0x12, 0x34, 0x56]);
        assert_eq!(&frame.as_bytes()[8..12], &[0x01, 0xA0, 0x00, 0x00]);
    }

    #[test]
    fn test_max_params_fill_the_frame() {
        let params = [0u32; 7];
        let frame = CommandFrame::new(0x20, &params).unwrap();
        assert_eq!(frame.as_bytes().len(), 32);
    }

    #[test]
    fn test_too_many_params_rejected() {
        let params = [0u32; 8];
        let err = CommandFrame::new(0x20, &params).unwrap_err();
        assert_eq!(
            err,
            CommandError::TooManyParameters {
                opcode: 0x20,
                count: 8
            }
        );
    }
}
