// crates/udo-rs/src/slave/mod.rs
//! Slave-side request model and application dispatch.
//!
//! The protocol engines (`SlSlave`, `IpSlave`) decode requests from the
//! wire, hand them to a single application callback and encode whatever
//! the callback left behind: answer data on success, an error response
//! when `result` is non-zero.

pub mod ip;
pub mod sl;

pub use ip::IpSlave;
pub use sl::SlSlave;

use crate::types::{
    UDO_IDENTITY_MAGIC, UDO_OBJ_IDENTITY, UDO_OBJ_MAX_PAYLOAD, UDOERR_READ_ONLY,
    UDOERR_WRONG_INDEX,
};

/// One decoded UDO request on its way through the slave.
///
/// `data` is the bounded working buffer owned by the protocol engine:
/// for writes it holds the `rqlen` incoming payload bytes, for reads the
/// callback fills it with at most `maxanslen` answer bytes and sets
/// `anslen`. A non-zero `result` turns the reply into an error response
/// carrying that code.
#[derive(Debug)]
pub struct SlaveRequest<'a> {
    pub iswrite: bool,
    pub index: u16,
    pub offset: u32,
    pub metadata: u32,
    /// Metadata width as it appeared on the wire (0 when absent).
    pub metalen: u8,
    /// Write payload length, or the length a read asked for.
    pub rqlen: u16,
    pub maxanslen: u16,
    pub anslen: u16,
    pub result: u16,
    pub data: &'a mut [u8],
}

impl SlaveRequest<'_> {
    /// The incoming payload of a write request.
    pub fn write_payload(&self) -> &[u8] {
        &self.data[..self.rqlen as usize]
    }

    /// Marks the request successfully executed with no answer data.
    pub fn respond_ok(&mut self) {
        self.result = 0;
    }

    /// Turns the reply into an error response with `ecode`.
    pub fn respond_error(&mut self, ecode: u16) {
        self.result = ecode;
    }

    /// Answers a read with the given bytes, clipped to `maxanslen`.
    pub fn respond_bytes(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.maxanslen as usize);
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.anslen = n as u16;
        self.result = 0;
    }

    /// Answers a read with a little-endian 32-bit value.
    pub fn respond_u32(&mut self, value: u32) {
        self.respond_bytes(&value.to_le_bytes());
    }

    /// Answers a read with a little-endian 16-bit value.
    pub fn respond_u16(&mut self, value: u16) {
        self.respond_bytes(&value.to_le_bytes());
    }
}

/// The single application callback of a slave.
///
/// Called once per decoded request; the implementation reads or applies
/// `rq` and fills in the reply fields. Dispatch is synchronous and
/// single-threaded: one request in flight at a time.
pub trait UdoSlaveApp {
    fn udo_read_write(&mut self, rq: &mut SlaveRequest<'_>);
}

/// Serves the two base objects every slave carries: `0x0000` (identity
/// magic) and `0x0001` (maximal payload size). Applications call this
/// for indexes they do not implement themselves.
///
/// Returns `true` when the request addressed a base object; otherwise
/// the request is answered with `UDOERR_WRONG_INDEX` and `false` is
/// returned.
pub fn handle_base_objects(rq: &mut SlaveRequest<'_>, max_payload_size: u16) -> bool {
    match rq.index {
        UDO_OBJ_IDENTITY => {
            if rq.iswrite {
                rq.respond_error(UDOERR_READ_ONLY);
            } else {
                rq.respond_u32(UDO_IDENTITY_MAGIC);
            }
            true
        }
        UDO_OBJ_MAX_PAYLOAD => {
            if rq.iswrite {
                rq.respond_error(UDOERR_READ_ONLY);
            } else {
                rq.respond_u32(max_payload_size as u32);
            }
            true
        }
        _ => {
            rq.respond_error(UDOERR_WRONG_INDEX);
            false
        }
    }
}
