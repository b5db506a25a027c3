// crates/udo-rs/src/slave/sl.rs
//! The UDO-SL slave engine: serial request deframing and response
//! transmission.
//!
//! The engine mirrors the master-side framer on the receive path and
//! adds the transmit encoder: bit7 of the response command byte is
//! copied from the request, errors go out with length code 6. Dispatch
//! is synchronous, one frame in flight at a time; frames failing their
//! CRC are dropped without a reply.

use crate::frame::sl::{
    SlDeframeEvent, SlDeframer, SlFrame, SlFrameMode, encode_error_response, encode_response,
};
use crate::slave::{SlaveRequest, UdoSlaveApp};
use crate::types::{UDO_MAX_PAYLOAD_LEN, UDOSL_MAX_FRAME_SIZE};
use log::{error, trace};

/// The UDO-SL slave protocol engine.
///
/// Feed it the bytes arriving on the serial line; whenever a complete
/// request passed its CRC check, the application is invoked and the
/// encoded reply is handed back for transmission.
pub struct SlSlave {
    deframer: SlDeframer,
    databuf: [u8; UDO_MAX_PAYLOAD_LEN],
    txbuf: [u8; UDOSL_MAX_FRAME_SIZE],
}

impl SlSlave {
    pub fn new() -> Self {
        Self {
            deframer: SlDeframer::new(SlFrameMode::Request),
            databuf: [0; UDO_MAX_PAYLOAD_LEN],
            txbuf: [0; UDOSL_MAX_FRAME_SIZE],
        }
    }

    /// CRC/framing errors seen on the receive path. Such frames never
    /// produce a reply; the master's timeout handles the rest.
    pub fn crc_error_count(&self) -> u32 {
        self.deframer.error_count()
    }

    /// Feeds one received byte.
    ///
    /// Returns the encoded reply frame once a request completed; the
    /// caller transmits it before feeding further bytes.
    pub fn process_byte(&mut self, byte: u8, app: &mut dyn UdoSlaveApp) -> Option<&[u8]> {
        match self.deframer.push(byte) {
            SlDeframeEvent::Pending | SlDeframeEvent::FramingError => None,
            SlDeframeEvent::Frame(frame) => self.dispatch(&frame, app),
        }
    }

    fn dispatch(&mut self, frame: &SlFrame, app: &mut dyn UdoSlaveApp) -> Option<&[u8]> {
        trace!(
            "UDO-SL slave: {} index {:#06X} offset {} len {}",
            if frame.iswrite { "write" } else { "read" },
            frame.index,
            frame.offset,
            frame.len
        );

        if frame.iswrite {
            self.databuf[..frame.payload.len()].copy_from_slice(&frame.payload);
        }

        // The answer never exceeds what the request asked for.
        let maxanslen = frame.len.min(UDO_MAX_PAYLOAD_LEN as u16);

        let mut rq = SlaveRequest {
            iswrite: frame.iswrite,
            index: frame.index,
            offset: frame.offset,
            metadata: frame.metadata,
            metalen: frame.metalen,
            rqlen: frame.len,
            maxanslen,
            anslen: 0,
            result: 0,
            data: &mut self.databuf,
        };
        app.udo_read_write(&mut rq);
        let (anslen, result) = (rq.anslen, rq.result);

        let encoded = if result != 0 {
            encode_error_response(frame.iswrite, frame.index, result, &mut self.txbuf)
        } else {
            let payload = if frame.iswrite {
                &[][..]
            } else {
                &self.databuf[..anslen as usize]
            };
            encode_response(frame.iswrite, frame.index, payload, &mut self.txbuf)
        };

        match encoded {
            Ok(len) => Some(&self.txbuf[..len]),
            Err(e) => {
                error!("UDO-SL slave: reply encoding failed: {}", e);
                None
            }
        }
    }
}

impl Default for SlSlave {
    fn default() -> Self {
        Self::new()
    }
}
