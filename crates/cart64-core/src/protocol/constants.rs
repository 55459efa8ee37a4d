//! Protocol constants for the 64drive USB command set.

// ============================================================================
// Device Identification
// ============================================================================

/// FTDI Vendor ID (the 64drive enumerates as a stock FTDI FIFO device).
pub const FTDI_VENDOR_ID: u16 = 0x0403;

/// FT232H Product ID — hardware revision 2.
pub const HW2_PRODUCT_ID: u16 = 0x6014;

/// FT2232H Product ID — hardware revision 1.
pub const HW1_PRODUCT_ID: u16 = 0x6010;

/// Known (PID, hardware version) pairs, newest hardware first.
pub const SUPPORTED_DEVICES: &[(u16, u8)] = &[(HW2_PRODUCT_ID, 2), (HW1_PRODUCT_ID, 1)];

// ============================================================================
// Command Framing
// ============================================================================

/// Literal tag following the opcode byte; the device firmware rejects
/// frames that do not carry it.
pub const COMMAND_TAG: [u8; 3] = *b"CMD";

/// Fixed capacity of a command frame, sized for the largest defined command.
pub const COMMAND_FRAME_CAPACITY: usize = 32;

/// Practical parameter cap: (32 - 4) / 4.
pub const MAX_COMMAND_PARAMS: usize = 7;

// ============================================================================
// Opcodes (Host -> Device)
// ============================================================================

/// Begin upload; bulk payload follows the command frame immediately.
pub const CMD_LOADRAM: u8 = 0x20;

/// Begin download; device streams the bulk payload back.
pub const CMD_DUMPRAM: u8 = 0x30;

/// Select save-type emulation (reserved, unused).
pub const CMD_SETSAVE: u8 = 0x70;

/// Select CIC boot-chip emulation (HW2 only).
pub const CMD_SETCIC: u8 = 0x72;

/// Query the 64-byte identity/version response.
pub const CMD_GETVER: u8 = 0x80;

/// Firmware upgrade (reserved, unused).
pub const CMD_UPGRADE: u8 = 0x84;

/// Firmware upgrade status report (reserved, unused).
pub const CMD_UPGREPORT: u8 = 0x85;

/// Enter debug standby (reserved, unused).
pub const CMD_STD_ENTER: u8 = 0x88;

/// Leave debug standby (reserved, unused).
pub const CMD_STD_LEAVE: u8 = 0x89;

/// PI single-word read (reserved, unused).
pub const CMD_PI_RD_32: u8 = 0x90;

/// PI single-word write (reserved, unused).
pub const CMD_PI_WR_32: u8 = 0x91;

/// PI burst read (reserved, unused).
pub const CMD_PI_RD_BURST: u8 = 0x92;

/// PI burst write (reserved, unused).
pub const CMD_PI_WR_BURST: u8 = 0x93;

/// PI buffered write (reserved, unused).
pub const CMD_PI_WR_BL: u8 = 0x94;

/// PI long buffered write (reserved, unused).
pub const CMD_PI_WR_BL_LONG: u8 = 0x95;

/// SI operation (reserved, unused).
pub const CMD_SI_OP: u8 = 0x98;

// ============================================================================
// Handshake
// ============================================================================

/// Magic constant in the second big-endian word of the GETVER response:
/// "UDEV". Its presence is the sole liveness check for the link.
pub const DEV_MAGIC: u32 = 0x5544_4556;

/// Fixed length of the GETVER response.
pub const GETVER_RESPONSE_LEN: usize = 64;

/// Total send/receive attempts before the handshake gives up.
pub const HANDSHAKE_ATTEMPTS: u32 = 4;

/// Variant codes starting with this byte identify the oldest hardware
/// revision, which cannot change CIC mode.
pub const RESTRICTED_VARIANT_MARKER: u8 = b'A';

// ============================================================================
// Bulk Transfer
// ============================================================================

/// One chunk-sizing unit: 128 KiB.
pub const CHUNK_UNIT: u64 = 128 * 1024;

/// Download fallback when no size is given. The protocol has no bank
/// capacity query, so this is an upper bound, not an exact size.
pub const DOWNLOAD_SIZE_FALLBACK: u64 = 256 * 1024 * 1024;

/// Per-chunk attempts before a bulk transfer aborts.
pub const BULK_RETRY_ATTEMPTS: u32 = 5;

/// Delay before each bulk retry, in milliseconds.
pub const BULK_RETRY_DELAY_MS: u64 = 10;

// ============================================================================
// CIC Selection
// ============================================================================

/// "Apply now" flag OR'd into the SETCIC parameter.
pub const CIC_APPLY_FLAG: u32 = 1 << 31;
