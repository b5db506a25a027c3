// crates/udo-rs/src/master/mod.rs
//! Master-side protocol: the transport-handler capability set and the
//! high-level `UdoComm` front end with session bootstrap, blob chunking
//! and typed accessors.

pub mod ip;
pub mod serial;

pub use ip::IpHandler;
pub use serial::SerialHandler;

use crate::UdoError;
use crate::types::{
    UDO_IDENTITY_MAGIC, UDO_MAX_PAYLOAD_LEN, UDO_MIN_NEGOTIABLE_PAYLOAD, UDO_OBJ_IDENTITY,
    UDO_OBJ_MAX_PAYLOAD,
};
use alloc::format;
use alloc::string::String;
use core::time::Duration;
use log::{debug, info};

/// The capability set of a UDO transport handler.
///
/// Variants are [`SerialHandler`] (UDO-SL) and [`IpHandler`] (UDO-IP);
/// the master holds one by reference. `open` and `close` are idempotent;
/// `open` restores the handler's default timeout.
pub trait UdoCommHandler {
    fn open(&mut self) -> Result<(), UdoError>;
    fn close(&mut self);
    fn opened(&self) -> bool;
    fn conn_string(&self) -> String;

    /// Overrides the reply timeout for subsequent requests.
    fn set_timeout(&mut self, timeout: Duration);

    /// Reads object `index` at `offset` into `data`.
    ///
    /// Returns the number of bytes the device answered with, at most
    /// `data.len()`.
    fn udo_read(&mut self, index: u16, offset: u32, data: &mut [u8]) -> Result<usize, UdoError>;

    /// Writes `data` to object `index` at `offset`.
    fn udo_write(&mut self, index: u16, offset: u32, data: &[u8]) -> Result<(), UdoError>;
}

/// Placeholder handler used where no transport is configured yet; every
/// transfer fails with `UDOERR_APPLICATION`.
#[derive(Debug, Default)]
pub struct NoneHandler;

impl UdoCommHandler for NoneHandler {
    fn open(&mut self) -> Result<(), UdoError> {
        Err(UdoError::Application(String::from(
            "open: invalid comm. handler",
        )))
    }

    fn close(&mut self) {}

    fn opened(&self) -> bool {
        false
    }

    fn conn_string(&self) -> String {
        String::from("NONE")
    }

    fn set_timeout(&mut self, _timeout: Duration) {}

    fn udo_read(&mut self, _index: u16, _offset: u32, _data: &mut [u8]) -> Result<usize, UdoError> {
        Err(UdoError::Application(String::from(
            "udo_read: invalid comm. handler",
        )))
    }

    fn udo_write(&mut self, _index: u16, _offset: u32, _data: &[u8]) -> Result<(), UdoError> {
        Err(UdoError::Application(String::from(
            "udo_write: invalid comm. handler",
        )))
    }
}

/// High-level master front end over one transport handler.
///
/// Adds the session bootstrap (identity check + payload negotiation),
/// small-response padding, blob chunking and typed register access on
/// top of the raw handler.
pub struct UdoComm<'a> {
    commh: &'a mut dyn UdoCommHandler,
    max_payload_size: u16,
}

impl<'a> UdoComm<'a> {
    pub fn new(commh: &'a mut dyn UdoCommHandler) -> Self {
        Self {
            commh,
            // Start with the smallest until the device reports its own.
            max_payload_size: UDO_MIN_NEGOTIABLE_PAYLOAD,
        }
    }

    /// Negotiated maximal payload per request.
    pub fn max_payload_size(&self) -> u16 {
        self.max_payload_size
    }

    pub fn conn_string(&self) -> String {
        self.commh.conn_string()
    }

    pub fn opened(&self) -> bool {
        self.commh.opened()
    }

    /// Opens the transport and runs the session bootstrap: object 0x0000
    /// must answer the identity magic and object 0x0001 the device's
    /// maximal payload size. Any mismatch closes the transport again.
    pub fn open(&mut self) -> Result<(), UdoError> {
        if !self.commh.opened() {
            self.commh.open()?;
        }

        let mut d = [0u8; 4];
        let r = self.commh.udo_read(UDO_OBJ_IDENTITY, 0, &mut d)?;
        let magic = u32::from_le_bytes(d);
        if r != 4 || magic != UDO_IDENTITY_MAGIC {
            self.commh.close();
            return Err(UdoError::Connection(format!(
                "invalid identity object response: {:#010X}",
                magic
            )));
        }

        let mut d = [0u8; 4];
        self.commh.udo_read(UDO_OBJ_MAX_PAYLOAD, 0, &mut d)?;
        let size = u32::from_le_bytes(d);
        if size < UDO_MIN_NEGOTIABLE_PAYLOAD as u32 || size > UDO_MAX_PAYLOAD_LEN as u32 {
            self.commh.close();
            return Err(UdoError::Connection(format!(
                "invalid maximal payload size: {}",
                size
            )));
        }
        self.max_payload_size = size as u16;

        info!(
            "{}: connected, max payload {} bytes",
            self.commh.conn_string(),
            self.max_payload_size
        );
        Ok(())
    }

    pub fn close(&mut self) {
        self.commh.close();
    }

    /// Reads object `index` at `offset`.
    ///
    /// Small responses (at most 8 bytes) shorter than the buffer zero
    /// the remainder, so the typed accessors below read well-defined
    /// values whatever width the device answered with.
    pub fn udo_read(&mut self, index: u16, offset: u32, data: &mut [u8]) -> Result<usize, UdoError> {
        let r = self.commh.udo_read(index, offset, data)?;
        if r <= 8 && r < data.len() {
            data[r..].fill(0);
        }
        Ok(r)
    }

    pub fn udo_write(&mut self, index: u16, offset: u32, data: &[u8]) -> Result<(), UdoError> {
        self.commh.udo_write(index, offset, data)
    }

    /// Reads a byte range larger than one payload by issuing consecutive
    /// chunked reads. Stops early when the device answers short or with
    /// zero bytes (end of object); returns the bytes transferred.
    pub fn read_blob(
        &mut self,
        index: u16,
        offset: u32,
        data: &mut [u8],
    ) -> Result<usize, UdoError> {
        let mut done = 0usize;
        let mut offs = offset;

        while done < data.len() {
            let chunk = (self.max_payload_size as usize).min(data.len() - done);
            let r = self.commh.udo_read(index, offs, &mut data[done..done + chunk])?;
            if r == 0 {
                break;
            }
            done += r;
            offs += r as u32;
            if r < chunk {
                break;
            }
        }

        debug!("read_blob({:#06X}): {} bytes", index, done);
        Ok(done)
    }

    /// Writes a byte range larger than one payload by issuing
    /// consecutive chunked writes; the first failure surfaces.
    pub fn write_blob(&mut self, index: u16, offset: u32, data: &[u8]) -> Result<(), UdoError> {
        let mut done = 0usize;
        let mut offs = offset;

        while done < data.len() {
            let chunk = (self.max_payload_size as usize).min(data.len() - done);
            self.commh.udo_write(index, offs, &data[done..done + chunk])?;
            done += chunk;
            offs += chunk as u32;
        }
        Ok(())
    }

    // --- Typed register access ---

    /// Reads a signed 32-bit value; a 2-byte response is sign-extended
    /// from 16 bits.
    pub fn read_i32(&mut self, index: u16, offset: u32) -> Result<i32, UdoError> {
        let mut d = [0u8; 4];
        let r = self.udo_read(index, offset, &mut d)?;
        if r == 2 {
            Ok(i16::from_le_bytes([d[0], d[1]]) as i32)
        } else {
            Ok(i32::from_le_bytes(d))
        }
    }

    pub fn read_i16(&mut self, index: u16, offset: u32) -> Result<i16, UdoError> {
        let mut d = [0u8; 2];
        self.udo_read(index, offset, &mut d)?;
        Ok(i16::from_le_bytes(d))
    }

    pub fn read_u32(&mut self, index: u16, offset: u32) -> Result<u32, UdoError> {
        let mut d = [0u8; 4];
        self.udo_read(index, offset, &mut d)?;
        Ok(u32::from_le_bytes(d))
    }

    pub fn read_u16(&mut self, index: u16, offset: u32) -> Result<u16, UdoError> {
        let mut d = [0u8; 2];
        self.udo_read(index, offset, &mut d)?;
        Ok(u16::from_le_bytes(d))
    }

    pub fn read_u8(&mut self, index: u16, offset: u32) -> Result<u8, UdoError> {
        let mut d = [0u8; 1];
        self.udo_read(index, offset, &mut d)?;
        Ok(d[0])
    }

    pub fn write_i32(&mut self, index: u16, offset: u32, value: i32) -> Result<(), UdoError> {
        self.udo_write(index, offset, &value.to_le_bytes())
    }

    pub fn write_i16(&mut self, index: u16, offset: u32, value: i16) -> Result<(), UdoError> {
        self.udo_write(index, offset, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, index: u16, offset: u32, value: u32) -> Result<(), UdoError> {
        self.udo_write(index, offset, &value.to_le_bytes())
    }

    pub fn write_u16(&mut self, index: u16, offset: u32, value: u16) -> Result<(), UdoError> {
        self.udo_write(index, offset, &value.to_le_bytes())
    }

    pub fn write_u8(&mut self, index: u16, offset: u32, value: u8) -> Result<(), UdoError> {
        self.udo_write(index, offset, &[value])
    }
}
