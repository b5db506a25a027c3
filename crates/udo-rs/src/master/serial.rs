// crates/udo-rs/src/master/serial.rs
//! The UDO-SL master handler: issues serial requests and receives the
//! framed response.
//!
//! The serial timeout is an inter-byte quiescence timer: as long as the
//! device keeps sending, a long response may take longer than the
//! timeout in total, but any silence of `timeout` aborts the transfer.

use crate::frame::sl::{SlDeframeEvent, SlDeframer, SlFrame, SlFrameMode, SlRequest};
use crate::hal::SerialInterface;
use crate::master::UdoCommHandler;
use crate::types::{UDO_MAX_PAYLOAD_LEN, UDOSL_MAX_FRAME_SIZE};
use crate::UdoError;
use alloc::format;
use alloc::string::String;
use core::time::Duration;
use log::trace;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// UDO-SL master over a [`SerialInterface`].
pub struct SerialHandler<S: SerialInterface> {
    link: S,
    pub timeout: Duration,
    pub default_timeout: Duration,
    /// Metadata sent along with every request; zero means "not carried".
    pub metadata: u32,
    deframer: SlDeframer,
    rqbuf: [u8; UDOSL_MAX_FRAME_SIZE],
}

impl<S: SerialInterface> SerialHandler<S> {
    pub fn new(link: S) -> Self {
        Self {
            link,
            timeout: DEFAULT_TIMEOUT,
            default_timeout: DEFAULT_TIMEOUT,
            metadata: 0,
            deframer: SlDeframer::new(SlFrameMode::Response),
            rqbuf: [0; UDOSL_MAX_FRAME_SIZE],
        }
    }

    /// CRC errors observed on received responses.
    pub fn crc_error_count(&self) -> u32 {
        self.deframer.error_count()
    }

    pub fn link(&mut self) -> &mut S {
        &mut self.link
    }

    fn send_request(
        &mut self,
        iswrite: bool,
        index: u16,
        offset: u32,
        rqlen: u16,
        payload: &[u8],
        op: &str,
    ) -> Result<(), UdoError> {
        self.link.flush()?;

        let rq = SlRequest {
            iswrite,
            index,
            offset,
            metadata: self.metadata,
            rqlen,
            payload,
        };
        let len = rq.serialize(&mut self.rqbuf)?;
        trace!("{}: sending {} frame bytes", op, len);
        self.link
            .send(&self.rqbuf[..len])
            .map_err(|e| UdoError::Connection(format!("{}: send error: {}", op, e)))
    }

    /// Runs the receive state machine until a response frame for the
    /// outstanding request completes.
    ///
    /// Responses with the wrong direction bit are discarded silently
    /// (stray bytes on a shared bus); a CRC mismatch surfaces as
    /// `UDOERR_CRC`; inter-byte silence of `timeout` as `UDOERR_TIMEOUT`.
    fn recv_response(&mut self, iswrite: bool, op: &str) -> Result<SlFrame, UdoError> {
        self.deframer.reset();
        self.deframer.expect_write(iswrite);

        let mut chunk = [0u8; 256];
        loop {
            let r = self.link.recv(&mut chunk, self.timeout)?;
            if r == 0 {
                return Err(UdoError::Timeout(format!("{}: response timeout", op)));
            }

            for &b in &chunk[..r] {
                match self.deframer.push(b) {
                    SlDeframeEvent::Pending => {}
                    SlDeframeEvent::Frame(frame) => return Ok(frame),
                    SlDeframeEvent::FramingError => {
                        return Err(UdoError::Crc(format!("{}: response CRC error", op)));
                    }
                }
            }
        }
    }
}

impl<S: SerialInterface> UdoCommHandler for SerialHandler<S> {
    fn open(&mut self) -> Result<(), UdoError> {
        self.timeout = self.default_timeout;
        if self.link.is_open() {
            return Ok(());
        }
        self.deframer.reset();
        self.link.open()
    }

    fn close(&mut self) {
        self.link.close();
    }

    fn opened(&self) -> bool {
        self.link.is_open()
    }

    fn conn_string(&self) -> String {
        format!("UDO-SL {}", self.link.describe())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn udo_read(&mut self, index: u16, offset: u32, data: &mut [u8]) -> Result<usize, UdoError> {
        let op = format!("UdoRead({:#06X}, {})", index, offset);
        if data.len() > UDO_MAX_PAYLOAD_LEN {
            return Err(UdoError::DataTooBig(format!(
                "{}: request length {} exceeds {}",
                op,
                data.len(),
                UDO_MAX_PAYLOAD_LEN
            )));
        }

        self.send_request(false, index, offset, data.len() as u16, &[], &op)?;
        let frame = self.recv_response(false, &op)?;

        if let Some(ecode) = frame.error {
            return Err(UdoError::Device {
                ecode,
                context: format!("{}: result {:#06X}", op, ecode),
            });
        }
        if frame.payload.len() > data.len() {
            return Err(UdoError::DataTooBig(format!(
                "{}: result data is too big: {}",
                op,
                frame.payload.len()
            )));
        }

        data[..frame.payload.len()].copy_from_slice(&frame.payload);
        Ok(frame.payload.len())
    }

    fn udo_write(&mut self, index: u16, offset: u32, data: &[u8]) -> Result<(), UdoError> {
        let op = format!("UdoWrite({:#06X}, {})[{}]", index, offset, data.len());
        if data.len() > UDO_MAX_PAYLOAD_LEN {
            return Err(UdoError::DataTooBig(format!(
                "{}: write data is too big",
                op
            )));
        }

        self.send_request(true, index, offset, data.len() as u16, data, &op)?;
        let frame = self.recv_response(true, &op)?;

        if let Some(ecode) = frame.error {
            return Err(UdoError::Device {
                ecode,
                context: format!("{}: result {:#06X}", op, ecode),
            });
        }
        Ok(())
    }
}
