// crates/udo-rs/src/frame/sl.rs
//! UDO-SL framing: the serial-line frame encoder and the byte-at-a-time
//! receive state machine.
//!
//! Frame layout (transmit order): sync `0x55`, command byte, optional
//! 2-byte extended length, 2-byte index, 0/1/2/4-byte offset,
//! 0/1/2/4-byte metadata, payload, CRC8. All multi-byte fields are
//! little-endian. The CRC runs from the sync byte through the last byte
//! before the CRC itself.
//!
//! Command byte: bit7 = write flag, bits[1:0] = offset width code,
//! bits[3:2] = metadata width code, bits[6:4] = length code.

use crate::UdoError;
use crate::crc::crc8_update;
use crate::types::{
    UDO_MAX_PAYLOAD_LEN, UDOSL_SYNC, code_to_width, field_width, width_to_code,
};
use alloc::format;
use alloc::vec::Vec;
use log::trace;

/// Length code marking an error response (payload = 2-byte error code).
const LENCODE_ERROR: u8 = 6;
/// Length code announcing the 2-byte extended length field.
const LENCODE_EXTENDED: u8 = 7;

/// Picks the smallest length code for a payload length.
///
/// Returns the code and, for code 7, the extended length value.
fn length_code(len: u16) -> (u8, Option<u16>) {
    match len {
        0..=2 => (len as u8, None),
        4 => (3, None),
        8 => (4, None),
        16 => (5, None),
        other => (LENCODE_EXTENDED, Some(other)),
    }
}

/// Payload length for an inline length code (0..=5).
fn inline_length(code: u8) -> u16 {
    match code {
        0..=2 => code as u16,
        3 => 4,
        4 => 8,
        _ => 16,
    }
}

/// Accumulates frame bytes and the running CRC.
struct SlWriter<'a> {
    buffer: &'a mut [u8],
    len: usize,
    crc: u8,
}

impl<'a> SlWriter<'a> {
    fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            len: 0,
            crc: 0,
        }
    }

    /// Appends bytes, folding each into the CRC.
    fn put(&mut self, data: &[u8]) -> Result<(), UdoError> {
        if self.len + data.len() > self.buffer.len() {
            return Err(UdoError::Connection(format!(
                "frame buffer overflow at {} bytes",
                self.len + data.len()
            )));
        }
        for &b in data {
            self.buffer[self.len] = b;
            self.len += 1;
            self.crc = crc8_update(self.crc, b);
        }
        Ok(())
    }

    /// Appends the trailing CRC byte and returns the frame length.
    fn finish(mut self) -> Result<usize, UdoError> {
        let crc = self.crc;
        self.put(&[crc])?;
        Ok(self.len)
    }
}

/// One UDO-SL request ready for the wire.
///
/// For writes `payload` carries `rqlen` bytes; for reads `payload` is
/// empty and `rqlen` is the number of bytes requested.
#[derive(Debug, Clone, Copy)]
pub struct SlRequest<'a> {
    pub iswrite: bool,
    pub index: u16,
    pub offset: u32,
    pub metadata: u32,
    pub rqlen: u16,
    pub payload: &'a [u8],
}

impl SlRequest<'_> {
    /// Serializes the request with its CRC into `buffer`.
    ///
    /// Returns the number of bytes written. The encoder always picks the
    /// smallest legal length code and field widths.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<usize, UdoError> {
        if self.rqlen as usize > UDO_MAX_PAYLOAD_LEN {
            return Err(UdoError::DataTooBig(format!(
                "request payload {} exceeds {}",
                self.rqlen, UDO_MAX_PAYLOAD_LEN
            )));
        }

        let offslen = field_width(self.offset);
        let metalen = field_width(self.metadata);
        let (lencode, extlen) = length_code(self.rqlen);

        let mut cmd = if self.iswrite { 0x80u8 } else { 0 };
        cmd |= width_to_code(offslen);
        cmd |= width_to_code(metalen) << 2;
        cmd |= lencode << 4;

        let mut w = SlWriter::new(buffer);
        w.put(&[UDOSL_SYNC])?;
        w.put(&[cmd])?;
        if let Some(ext) = extlen {
            w.put(&ext.to_le_bytes())?;
        }
        w.put(&self.index.to_le_bytes())?;
        w.put(&self.offset.to_le_bytes()[..offslen as usize])?;
        w.put(&self.metadata.to_le_bytes()[..metalen as usize])?;
        if self.iswrite {
            w.put(&self.payload[..self.rqlen as usize])?;
        }
        w.finish()
    }
}

/// Serializes a success response: bit7 echoes the request's direction,
/// the index is echoed, offset and metadata are not carried (the
/// response's own zero values give them width 0), and reads carry the
/// answer payload.
pub fn encode_response(
    iswrite: bool,
    index: u16,
    payload: &[u8],
    buffer: &mut [u8],
) -> Result<usize, UdoError> {
    if payload.len() > UDO_MAX_PAYLOAD_LEN {
        return Err(UdoError::DataTooBig(format!(
            "response payload {} exceeds {}",
            payload.len(),
            UDO_MAX_PAYLOAD_LEN
        )));
    }

    let (lencode, extlen) = length_code(payload.len() as u16);
    let cmd = if iswrite { 0x80u8 } else { 0 } | (lencode << 4);

    let mut w = SlWriter::new(buffer);
    w.put(&[UDOSL_SYNC])?;
    w.put(&[cmd])?;
    if let Some(ext) = extlen {
        w.put(&ext.to_le_bytes())?;
    }
    w.put(&index.to_le_bytes())?;
    w.put(payload)?;
    w.finish()
}

/// Serializes an error response: length code 6 and a 2-byte payload with
/// the little-endian error code.
pub fn encode_error_response(
    iswrite: bool,
    index: u16,
    ecode: u16,
    buffer: &mut [u8],
) -> Result<usize, UdoError> {
    let cmd = if iswrite { 0x80u8 } else { 0 } | (LENCODE_ERROR << 4);

    let mut w = SlWriter::new(buffer);
    w.put(&[UDOSL_SYNC])?;
    w.put(&[cmd])?;
    w.put(&index.to_le_bytes())?;
    w.put(&ecode.to_le_bytes())?;
    w.finish()
}

/// A completely received UDO-SL frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlFrame {
    pub iswrite: bool,
    pub index: u16,
    pub offset: u32,
    pub metadata: u32,
    /// Length field from the header. For read requests this is the
    /// requested length; otherwise it equals `payload.len()`.
    pub len: u16,
    /// Metadata width decoded from the command byte.
    pub metalen: u8,
    /// Consumed payload bytes: write data on the request side, read data
    /// on the response side. Empty for error responses.
    pub payload: Vec<u8>,
    /// Error code of an error response (length code 6, response side).
    pub error: Option<u16>,
}

/// Which side of the link the deframer parses.
///
/// The direction decides when a frame carries payload bytes: request
/// frames only for writes, response frames only for reads and error
/// responses (exactly two bytes of error code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlFrameMode {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Sync,
    Cmd,
    ExtLen,
    Index,
    Offset,
    Metadata,
    Data,
    Crc,
}

/// Result of feeding one byte to the deframer.
#[derive(Debug, PartialEq, Eq)]
pub enum SlDeframeEvent {
    /// Frame still incomplete.
    Pending,
    /// A frame arrived and passed its CRC check.
    Frame(SlFrame),
    /// CRC mismatch or malformed header; the deframer went back to sync
    /// hunting and counted the error.
    FramingError,
}

/// The UDO-SL receive state machine.
///
/// Bytes are pushed one at a time; every byte except the sync hunt
/// leftovers and the trailing CRC folds into the running CRC, which is
/// seeded at 0 with the sync byte folded in first.
pub struct SlDeframer {
    mode: SlFrameMode,
    /// Response mode: silently resync when the command byte's write bit
    /// does not match, tolerating stray bytes on a shared bus.
    expected_iswrite: Option<bool>,
    state: RxState,
    crc: u8,
    iswrite: bool,
    is_error: bool,
    len: u16,
    offslen: u8,
    metalen: u8,
    index: u16,
    offset: u32,
    metadata: u32,
    cnt: u8,
    payload: Vec<u8>,
    error_count: u32,
}

impl SlDeframer {
    pub fn new(mode: SlFrameMode) -> Self {
        Self {
            mode,
            expected_iswrite: None,
            state: RxState::Sync,
            crc: 0,
            iswrite: false,
            is_error: false,
            len: 0,
            offslen: 0,
            metalen: 0,
            index: 0,
            offset: 0,
            metadata: 0,
            cnt: 0,
            payload: Vec::new(),
            error_count: 0,
        }
    }

    /// Framing/CRC errors seen since construction.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Arms the write-bit filter for the next response frame.
    pub fn expect_write(&mut self, iswrite: bool) {
        self.expected_iswrite = Some(iswrite);
    }

    /// Drops any partially received frame and hunts for sync again.
    pub fn reset(&mut self) {
        self.state = RxState::Sync;
        self.payload.clear();
    }

    fn fail(&mut self) -> SlDeframeEvent {
        self.error_count += 1;
        self.reset();
        SlDeframeEvent::FramingError
    }

    /// Number of payload bytes this frame carries on the wire.
    fn wire_payload_len(&self) -> u16 {
        match self.mode {
            SlFrameMode::Request => {
                if self.iswrite {
                    self.len
                } else {
                    0
                }
            }
            SlFrameMode::Response => {
                if self.is_error {
                    2
                } else if self.iswrite {
                    0
                } else {
                    self.len
                }
            }
        }
    }

    /// Feeds one received byte. Call in a loop over everything the
    /// transport hands over.
    pub fn push(&mut self, byte: u8) -> SlDeframeEvent {
        if !matches!(self.state, RxState::Sync | RxState::Crc) {
            self.crc = crc8_update(self.crc, byte);
        }

        match self.state {
            RxState::Sync => {
                if byte == UDOSL_SYNC {
                    self.crc = crc8_update(0, byte);
                    self.state = RxState::Cmd;
                }
                SlDeframeEvent::Pending
            }

            RxState::Cmd => {
                self.iswrite = byte & 0x80 != 0;
                if let Some(expected) = self.expected_iswrite {
                    if self.iswrite != expected {
                        trace!("UDO-SL: direction bit mismatch, resyncing");
                        self.reset();
                        return SlDeframeEvent::Pending;
                    }
                }

                self.offslen = code_to_width(byte & 0x03);
                self.metalen = code_to_width((byte >> 2) & 0x03);
                self.offset = 0;
                self.metadata = 0;
                self.is_error = false;
                self.payload.clear();
                self.cnt = 0;

                let lencode = (byte >> 4) & 0x07;
                match lencode {
                    LENCODE_EXTENDED => {
                        self.state = RxState::ExtLen;
                        return SlDeframeEvent::Pending;
                    }
                    LENCODE_ERROR => {
                        if self.mode == SlFrameMode::Request {
                            // The error marker is only valid in responses.
                            return self.fail();
                        }
                        self.is_error = true;
                        self.len = 2;
                    }
                    code => self.len = inline_length(code),
                }
                self.state = RxState::Index;
                SlDeframeEvent::Pending
            }

            RxState::ExtLen => {
                if self.cnt == 0 {
                    self.len = byte as u16;
                    self.cnt = 1;
                } else {
                    self.len |= (byte as u16) << 8;
                    self.cnt = 0;
                    if self.len as usize > UDO_MAX_PAYLOAD_LEN {
                        trace!("UDO-SL: oversized frame length {}", self.len);
                        return self.fail();
                    }
                    self.state = RxState::Index;
                }
                SlDeframeEvent::Pending
            }

            RxState::Index => {
                if self.cnt == 0 {
                    self.index = byte as u16;
                    self.cnt = 1;
                } else {
                    self.index |= (byte as u16) << 8;
                    self.cnt = 0;
                    self.state = self.next_after_index();
                }
                SlDeframeEvent::Pending
            }

            RxState::Offset => {
                self.offset |= (byte as u32) << (self.cnt * 8);
                self.cnt += 1;
                if self.cnt >= self.offslen {
                    self.cnt = 0;
                    self.state = self.next_after_offset();
                }
                SlDeframeEvent::Pending
            }

            RxState::Metadata => {
                self.metadata |= (byte as u32) << (self.cnt * 8);
                self.cnt += 1;
                if self.cnt >= self.metalen {
                    self.cnt = 0;
                    self.state = self.next_after_metadata();
                }
                SlDeframeEvent::Pending
            }

            RxState::Data => {
                self.payload.push(byte);
                if self.payload.len() >= self.wire_payload_len() as usize {
                    self.state = RxState::Crc;
                }
                SlDeframeEvent::Pending
            }

            RxState::Crc => {
                if byte != self.crc {
                    trace!(
                        "UDO-SL: CRC mismatch, expected {:#04X} got {:#04X}",
                        self.crc, byte
                    );
                    return self.fail();
                }
                let frame = self.take_frame();
                self.reset();
                SlDeframeEvent::Frame(frame)
            }
        }
    }

    fn next_after_index(&self) -> RxState {
        if self.offslen > 0 {
            RxState::Offset
        } else {
            self.next_after_offset()
        }
    }

    fn next_after_offset(&self) -> RxState {
        if self.metalen > 0 {
            RxState::Metadata
        } else {
            self.next_after_metadata()
        }
    }

    fn next_after_metadata(&self) -> RxState {
        if self.wire_payload_len() > 0 {
            RxState::Data
        } else {
            RxState::Crc
        }
    }

    fn take_frame(&mut self) -> SlFrame {
        let payload = core::mem::take(&mut self.payload);
        let error = if self.is_error {
            Some(u16::from_le_bytes([payload[0], payload[1]]))
        } else {
            None
        };
        SlFrame {
            iswrite: self.iswrite,
            index: self.index,
            offset: self.offset,
            metadata: self.metadata,
            len: self.len,
            metalen: self.metalen,
            payload: if self.is_error { Vec::new() } else { payload },
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc8_all;
    use alloc::vec;

    fn deframe_all(deframer: &mut SlDeframer, bytes: &[u8]) -> Option<SlFrame> {
        for &b in bytes {
            if let SlDeframeEvent::Frame(frame) = deframer.push(b) {
                return Some(frame);
            }
        }
        None
    }

    #[test]
    fn test_encoder_picks_smallest_length_code() {
        // Boundary grid: payload length -> expected length code.
        let cases: &[(u16, u8)] = &[
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 7),
            (4, 3),
            (5, 7),
            (8, 4),
            (15, 7),
            (16, 5),
            (17, 7),
            (1024, 7),
        ];
        let payload = [0u8; 1024];
        for &(len, code) in cases {
            let rq = SlRequest {
                iswrite: true,
                index: 0x0001,
                offset: 0,
                metadata: 0,
                rqlen: len,
                payload: &payload[..len as usize],
            };
            let mut buffer = [0u8; 2048];
            rq.serialize(&mut buffer).unwrap();
            assert_eq!((buffer[1] >> 4) & 0x07, code, "rqlen {}", len);
        }
    }

    #[test]
    fn test_read_request_wire_bytes() {
        // Read of object 0x1234, offset 0, 4 bytes, no metadata.
        let rq = SlRequest {
            iswrite: false,
            index: 0x1234,
            offset: 0,
            metadata: 0,
            rqlen: 4,
            payload: &[],
        };
        let mut buffer = [0u8; 64];
        let len = rq.serialize(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], &[0x55, 0x30, 0x34, 0x12, 0x80]);
        assert_eq!(crc8_all(&buffer[..len - 1]), buffer[len - 1]);
    }

    #[test]
    fn test_write_request_wire_bytes() {
        // Write of object 0x00A0, offset 0x100, one byte 0xAB.
        let rq = SlRequest {
            iswrite: true,
            index: 0x00A0,
            offset: 0x100,
            metadata: 0,
            rqlen: 1,
            payload: &[0xAB],
        };
        let mut buffer = [0u8; 64];
        let len = rq.serialize(&mut buffer).unwrap();
        // bit7 write, offslen code 2, length code 1.
        assert_eq!(
            &buffer[..len - 1],
            &[0x55, 0x92, 0xA0, 0x00, 0x00, 0x01, 0xAB]
        );
        assert_eq!(crc8_all(&buffer[..len - 1]), buffer[len - 1]);
    }

    #[test]
    fn test_read_response_roundtrip() {
        let mut buffer = [0u8; 64];
        let len = encode_response(false, 0x1234, &[0xDE, 0xAD, 0xBE, 0xEF], &mut buffer).unwrap();
        assert_eq!(buffer[1], 0x30); // length code 3, no offset/meta, read

        let mut deframer = SlDeframer::new(SlFrameMode::Response);
        let frame = deframe_all(&mut deframer, &buffer[..len]).expect("frame");
        assert_eq!(frame.index, 0x1234);
        assert_eq!(frame.payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(frame.error, None);
        assert!(!frame.iswrite);
    }

    #[test]
    fn test_error_response_roundtrip() {
        let mut buffer = [0u8; 64];
        let len = encode_error_response(true, 0x00A0, 0x2000, &mut buffer).unwrap();
        assert_eq!(buffer[1], 0x80 | (6 << 4));

        let mut deframer = SlDeframer::new(SlFrameMode::Response);
        let frame = deframe_all(&mut deframer, &buffer[..len]).expect("frame");
        assert_eq!(frame.error, Some(0x2000));
        assert!(frame.payload.is_empty());
        assert!(frame.iswrite);
    }

    #[test]
    fn test_write_request_deframe() {
        let rq = SlRequest {
            iswrite: true,
            index: 0xBEEF,
            offset: 0x12345,
            metadata: 0x80,
            rqlen: 5,
            payload: &[1, 2, 3, 4, 5],
        };
        let mut buffer = [0u8; 64];
        let len = rq.serialize(&mut buffer).unwrap();

        let mut deframer = SlDeframer::new(SlFrameMode::Request);
        let frame = deframe_all(&mut deframer, &buffer[..len]).expect("frame");
        assert!(frame.iswrite);
        assert_eq!(frame.index, 0xBEEF);
        assert_eq!(frame.offset, 0x12345);
        assert_eq!(frame.metadata, 0x80);
        assert_eq!(frame.len, 5);
        assert_eq!(frame.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_read_request_carries_no_payload() {
        // A read request announces its length but the data bytes only
        // travel in the response.
        let rq = SlRequest {
            iswrite: false,
            index: 0x0002,
            offset: 0,
            metadata: 0,
            rqlen: 16,
            payload: &[],
        };
        let mut buffer = [0u8; 64];
        let len = rq.serialize(&mut buffer).unwrap();
        // sync + cmd + index(2) + crc
        assert_eq!(len, 5);

        let mut deframer = SlDeframer::new(SlFrameMode::Request);
        let frame = deframe_all(&mut deframer, &buffer[..len]).expect("frame");
        assert_eq!(frame.len, 16);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_crc_mismatch_resyncs_and_counts() {
        let rq = SlRequest {
            iswrite: true,
            index: 0x0001,
            offset: 0,
            metadata: 0,
            rqlen: 1,
            payload: &[0x42],
        };
        let mut buffer = [0u8; 64];
        let len = rq.serialize(&mut buffer).unwrap();
        buffer[len - 1] ^= 0xFF; // corrupt the CRC

        let mut deframer = SlDeframer::new(SlFrameMode::Request);
        let mut saw_error = false;
        for &b in &buffer[..len] {
            if deframer.push(b) == SlDeframeEvent::FramingError {
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert_eq!(deframer.error_count(), 1);

        // The deframer recovers: the same frame with a good CRC parses.
        buffer[len - 1] ^= 0xFF;
        assert!(deframe_all(&mut deframer, &buffer[..len]).is_some());
    }

    #[test]
    fn test_stray_bytes_before_sync_ignored() {
        let mut buffer = [0u8; 64];
        let len = encode_response(false, 0x0001, &[0xAA], &mut buffer).unwrap();

        let mut deframer = SlDeframer::new(SlFrameMode::Response);
        for &b in &[0x00, 0xFF, 0x12] {
            assert_eq!(deframer.push(b), SlDeframeEvent::Pending);
        }
        assert!(deframe_all(&mut deframer, &buffer[..len]).is_some());
        assert_eq!(deframer.error_count(), 0);
    }

    #[test]
    fn test_direction_mismatch_resyncs_silently() {
        let mut buffer = [0u8; 64];
        let len = encode_response(false, 0x0001, &[0xAA], &mut buffer).unwrap();

        // Master waiting for a write response must discard a read frame
        // without counting an error.
        let mut deframer = SlDeframer::new(SlFrameMode::Response);
        deframer.expect_write(true);
        assert!(deframe_all(&mut deframer, &buffer[..len]).is_none());
        assert_eq!(deframer.error_count(), 0);

        let mut wbuf = [0u8; 64];
        let wlen = encode_response(true, 0x0001, &[], &mut wbuf).unwrap();
        assert!(deframe_all(&mut deframer, &wbuf[..wlen]).is_some());
    }

    #[test]
    fn test_error_marker_invalid_in_requests() {
        let mut buffer = [0u8; 64];
        let len = encode_error_response(false, 0x0001, 0x2000, &mut buffer).unwrap();

        let mut deframer = SlDeframer::new(SlFrameMode::Request);
        let mut events = buffer[..len].iter().map(|&b| deframer.push(b));
        assert!(events.any(|e| e == SlDeframeEvent::FramingError));
        assert_eq!(deframer.error_count(), 1);
    }

    #[test]
    fn test_oversized_extended_length_rejected() {
        // Hand-built header announcing 2047 payload bytes.
        let mut frame = vec![0x55u8, 0x80 | (7 << 4), 0xFF, 0x07, 0x01, 0x00];
        let crc = crc8_all(&frame);
        frame.push(crc);

        let mut deframer = SlDeframer::new(SlFrameMode::Request);
        let mut saw_error = false;
        for &b in &frame {
            if deframer.push(b) == SlDeframeEvent::FramingError {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
