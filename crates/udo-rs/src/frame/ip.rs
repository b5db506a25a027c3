// crates/udo-rs/src/frame/ip.rs
//! The UDO-IP datagram header.
//!
//! Every UDO-IP request and response starts with the same fixed 16-byte
//! little-endian header; the payload follows immediately. The header is
//! a byte-exact wire encoding, not a memory layout, so the codec works
//! with explicit byte operations.

use crate::UdoError;
use crate::frame::Codec;
use crate::types::{UDOIP_HEADER_SIZE, code_to_width, width_to_code};
use alloc::format;

/// Value of the 11-bit length field that marks an error response.
pub const UDOIP_ERROR_LEN: u16 = 0x7FF;

/// The 16-byte header of a UDO-IP datagram.
///
/// `len_cmd` packs three fields: bits[10:0] payload length (`0x7FF`
/// marks an error response), bits[14:13] the metadata width code and
/// bit15 the write flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpRqHeader {
    /// Client-monotonic sequence number; echoed by the slave and used
    /// for reply matching and request deduplication.
    pub rqid: u32,
    pub len_cmd: u16,
    pub index: u16,
    pub offset: u32,
    pub metadata: u32,
}

impl IpRqHeader {
    /// Header for a read request expecting up to `len` payload bytes.
    pub fn read_request(rqid: u32, index: u16, offset: u32, len: u16) -> Self {
        Self {
            rqid,
            len_cmd: len & UDOIP_ERROR_LEN,
            index,
            offset,
            metadata: 0,
        }
    }

    /// Header for a write request carrying `len` payload bytes.
    pub fn write_request(rqid: u32, index: u16, offset: u32, len: u16) -> Self {
        Self {
            rqid,
            len_cmd: (len & UDOIP_ERROR_LEN) | (1 << 15),
            index,
            offset,
            metadata: 0,
        }
    }

    /// The 11-bit payload length field.
    pub fn len(&self) -> u16 {
        self.len_cmd & UDOIP_ERROR_LEN
    }

    pub fn is_write(&self) -> bool {
        (self.len_cmd >> 15) & 1 != 0
    }

    /// True when the length field carries the error-response marker.
    pub fn is_error(&self) -> bool {
        self.len() == UDOIP_ERROR_LEN
    }

    /// Metadata width decoded from bits[14:13]. Masters do not populate
    /// this code in requests, so it usually reads 0.
    pub fn metalen(&self) -> u8 {
        code_to_width(((self.len_cmd >> 13) & 0x03) as u8)
    }

    /// Rewrites the length field, keeping the write flag and the
    /// metadata code.
    pub fn set_len(&mut self, len: u16) {
        self.len_cmd = (self.len_cmd & !UDOIP_ERROR_LEN) | (len & UDOIP_ERROR_LEN);
    }

    /// Sets the metadata width code in bits[14:13].
    pub fn set_metalen(&mut self, width: u8) {
        self.len_cmd =
            (self.len_cmd & !(0x03 << 13)) | ((width_to_code(width) as u16 & 0x03) << 13);
    }
}

impl Codec for IpRqHeader {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, UdoError> {
        if buffer.len() < UDOIP_HEADER_SIZE {
            return Err(UdoError::Connection(format!(
                "buffer too short for UDO-IP header: {}",
                buffer.len()
            )));
        }

        buffer[0..4].copy_from_slice(&self.rqid.to_le_bytes());
        buffer[4..6].copy_from_slice(&self.len_cmd.to_le_bytes());
        buffer[6..8].copy_from_slice(&self.index.to_le_bytes());
        buffer[8..12].copy_from_slice(&self.offset.to_le_bytes());
        buffer[12..16].copy_from_slice(&self.metadata.to_le_bytes());

        Ok(UDOIP_HEADER_SIZE)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, UdoError> {
        if buffer.len() < UDOIP_HEADER_SIZE {
            return Err(UdoError::Connection(format!(
                "datagram too short for UDO-IP header: {}",
                buffer.len()
            )));
        }

        Ok(Self {
            rqid: u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]),
            len_cmd: u16::from_le_bytes([buffer[4], buffer[5]]),
            index: u16::from_le_bytes([buffer[6], buffer[7]]),
            offset: u32::from_le_bytes([buffer[8], buffer[9], buffer[10], buffer[11]]),
            metadata: u32::from_le_bytes([buffer[12], buffer[13], buffer[14], buffer[15]]),
        })
    }
}
