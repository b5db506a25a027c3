// crates/udo-rs/src/types.rs

// --- Protocol Constants ---

/// Maximum payload carried by a single UDO request or response, in bytes.
pub const UDO_MAX_PAYLOAD_LEN: usize = 1024;

/// UDO-SL frame sync byte. Every serial frame starts with it and the CRC
/// folds it in first.
pub const UDOSL_SYNC: u8 = 0x55;

/// Largest UDO-SL frame: sync + command + extended length + index +
/// offset + metadata + payload + CRC.
pub const UDOSL_MAX_FRAME_SIZE: usize = UDO_MAX_PAYLOAD_LEN + 16;

/// UDO-IP request/response header size (fixed, little-endian).
pub const UDOIP_HEADER_SIZE: usize = 16;

/// Largest UDO-IP datagram: 16-byte header + maximal payload.
pub const UDOIP_MAX_RQ_SIZE: usize = UDOIP_HEADER_SIZE + UDO_MAX_PAYLOAD_LEN;

/// Default UDP port of a UDO-IP slave.
pub const UDOIP_DEFAULT_PORT: u16 = 1221;

/// Value of the identity object 0x0000, used for link validation.
pub const UDO_IDENTITY_MAGIC: u32 = 0x66CC_AA55;

/// Object index of the identity magic.
pub const UDO_OBJ_IDENTITY: u16 = 0x0000;

/// Object index of the device's maximal payload size.
pub const UDO_OBJ_MAX_PAYLOAD: u16 = 0x0001;

/// Smallest payload size a device may report in object 0x0001.
pub const UDO_MIN_NEGOTIABLE_PAYLOAD: u16 = 64;

/// An IPv4 address in network byte order, as carried by the slave HAL.
pub type IpAddress = [u8; 4];

// --- Error Codes ---
// Stable numeric taxonomy shared by master and slave. Zero means success
// and never appears in an error response.

pub const UDOERR_CONNECTION: u16 = 0x1001;
pub const UDOERR_CRC: u16 = 0x1002;
pub const UDOERR_TIMEOUT: u16 = 0x1003;
pub const UDOERR_DATA_TOO_BIG: u16 = 0x1004;

// Object-layer codes returned by slaves.
pub const UDOERR_WRONG_INDEX: u16 = 0x2000;
pub const UDOERR_WRONG_OFFSET: u16 = 0x2001;
pub const UDOERR_WRONG_ACCESS: u16 = 0x2002;
pub const UDOERR_READ_ONLY: u16 = 0x2010;
pub const UDOERR_WRITE_ONLY: u16 = 0x2011;
pub const UDOERR_WRITE_BOUNDS: u16 = 0x2012;
pub const UDOERR_WRITE_VALUE: u16 = 0x2020;
pub const UDOERR_RUN_MODE: u16 = 0x2030;
pub const UDOERR_BUSY: u16 = 0x2050;

pub const UDOERR_NOT_IMPLEMENTED: u16 = 0x9001;
pub const UDOERR_INTERNAL: u16 = 0x9002;
pub const UDOERR_APPLICATION: u16 = 0x9003;

// --- Field Width Handling ---
// Offset and metadata travel with the smallest width that losslessly
// encodes the value: 0, 1, 2 or 4 bytes, 0 when the value is zero.

/// Returns the wire width for an offset or metadata value.
pub fn field_width(value: u32) -> u8 {
    if value == 0 {
        0
    } else if value > 0xFFFF {
        4
    } else if value > 0xFF {
        2
    } else {
        1
    }
}

/// Maps a field width in {0,1,2,4} to its 2-bit wire code {0,1,2,3}.
pub fn width_to_code(width: u8) -> u8 {
    if width == 4 { 3 } else { width }
}

/// Maps a 2-bit wire code back to the field width.
pub fn code_to_width(code: u8) -> u8 {
    match code & 0x03 {
        3 => 4,
        w => w,
    }
}
