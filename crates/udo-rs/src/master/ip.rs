// crates/udo-rs/src/master/ip.rs
//! The UDO-IP master handler: one datagram per request, retries on
//! timeout and on replies that do not match the outstanding request.

use crate::frame::Codec;
use crate::frame::ip::IpRqHeader;
use crate::hal::UdpInterface;
use crate::master::UdoCommHandler;
use crate::types::{UDO_MAX_PAYLOAD_LEN, UDOIP_HEADER_SIZE, UDOIP_MAX_RQ_SIZE};
use crate::UdoError;
use alloc::format;
use alloc::string::String;
use core::time::Duration;
use log::trace;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// How often a request is sent before giving up.
pub const UDOIP_MAX_TRIES: u32 = 3;

/// UDO-IP master over a [`UdpInterface`].
pub struct IpHandler<U: UdpInterface> {
    link: U,
    pub timeout: Duration,
    pub default_timeout: Duration,
    pub max_tries: u32,
    /// Metadata sent along with every request; zero means "not carried".
    pub metadata: u32,
    cursqnum: u32,
    rqbuf: [u8; UDOIP_MAX_RQ_SIZE],
    ansbuf: [u8; UDOIP_MAX_RQ_SIZE],
}

impl<U: UdpInterface> IpHandler<U> {
    pub fn new(link: U) -> Self {
        Self {
            link,
            timeout: DEFAULT_TIMEOUT,
            default_timeout: DEFAULT_TIMEOUT,
            max_tries: UDOIP_MAX_TRIES,
            metadata: 0,
            cursqnum: 0,
            rqbuf: [0; UDOIP_MAX_RQ_SIZE],
            ansbuf: [0; UDOIP_MAX_RQ_SIZE],
        }
    }

    pub fn link(&mut self) -> &mut U {
        &mut self.link
    }

    /// Sends the request and collects the matching reply, retrying up to
    /// `max_tries` times on timeouts, short datagrams and replies whose
    /// identity (`rqid`, `index`, `offset`) does not match.
    ///
    /// Returns the response payload length; for reads the payload has
    /// been copied into `data`.
    fn do_read_write(
        &mut self,
        iswrite: bool,
        index: u16,
        offset: u32,
        data_out: Option<&mut [u8]>,
        data_in: &[u8],
        op: &str,
    ) -> Result<usize, UdoError> {
        // A fresh sequence number for every new request; retransmissions
        // of the same request keep it.
        self.cursqnum = self.cursqnum.wrapping_add(1);

        let rqlen = if iswrite {
            data_in.len()
        } else {
            data_out.as_deref().map_or(0, |d| d.len())
        };

        let mut header = if iswrite {
            IpRqHeader::write_request(self.cursqnum, index, offset, rqlen as u16)
        } else {
            IpRqHeader::read_request(self.cursqnum, index, offset, rqlen as u16)
        };
        header.metadata = self.metadata;
        header.serialize(&mut self.rqbuf)?;

        let rqsize = if iswrite {
            self.rqbuf[UDOIP_HEADER_SIZE..UDOIP_HEADER_SIZE + rqlen].copy_from_slice(data_in);
            UDOIP_HEADER_SIZE + rqlen
        } else {
            UDOIP_HEADER_SIZE
        };

        let mut trynum = 0;
        let ans_datalen = loop {
            trynum += 1;

            // Send failures are never retried.
            self.link
                .send(&self.rqbuf[..rqsize])
                .map_err(|e| UdoError::Connection(format!("{}: send error: {}", op, e)))?;

            let r = match self.link.recv(&mut self.ansbuf, self.timeout)? {
                Some(r) => r,
                None => {
                    if trynum < self.max_tries {
                        trace!("{}: timeout, try {}", op, trynum);
                        continue; // re-send on timeout
                    }
                    return Err(UdoError::Timeout(format!("{}: timeout", op)));
                }
            };

            if r < UDOIP_HEADER_SIZE {
                if trynum < self.max_tries {
                    continue;
                }
                return Err(UdoError::Connection(format!(
                    "{}: invalid response length: {}",
                    op, r
                )));
            }

            let anshead = IpRqHeader::deserialize(&self.ansbuf[..r])?;
            if anshead.rqid != self.cursqnum || anshead.index != index || anshead.offset != offset
            {
                if trynum < self.max_tries {
                    trace!("{}: reply identity mismatch, try {}", op, trynum);
                    continue;
                }
                return Err(UdoError::Connection(format!("{}: unexpected response", op)));
            }

            if anshead.is_error() {
                if r < UDOIP_HEADER_SIZE + 2 {
                    return Err(UdoError::Connection(format!(
                        "{}: error response length: {}",
                        op, r
                    )));
                }
                let ecode = u16::from_le_bytes([
                    self.ansbuf[UDOIP_HEADER_SIZE],
                    self.ansbuf[UDOIP_HEADER_SIZE + 1],
                ]);
                return Err(UdoError::Device {
                    ecode,
                    context: format!("{}: result {:#06X}", op, ecode),
                });
            }

            break r - UDOIP_HEADER_SIZE;
        };

        if let Some(data) = data_out {
            if ans_datalen > data.len() {
                return Err(UdoError::DataTooBig(format!(
                    "{}: result data is too big: {}",
                    op, ans_datalen
                )));
            }
            data[..ans_datalen]
                .copy_from_slice(&self.ansbuf[UDOIP_HEADER_SIZE..UDOIP_HEADER_SIZE + ans_datalen]);
        }
        Ok(ans_datalen)
    }
}

impl<U: UdpInterface> UdoCommHandler for IpHandler<U> {
    fn open(&mut self) -> Result<(), UdoError> {
        self.timeout = self.default_timeout;
        if self.link.is_open() {
            return Ok(());
        }
        // Always start at zero; the source port differs per connection.
        self.cursqnum = 0;
        self.link.open()
    }

    fn close(&mut self) {
        self.link.close();
    }

    fn opened(&self) -> bool {
        self.link.is_open()
    }

    fn conn_string(&self) -> String {
        format!("UDO-IP {}", self.link.describe())
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
        self.do_read_write(false, index, offset, Some(data), &[], &op)
    }

    fn udo_write(&mut self, index: u16, offset: u32, data: &[u8]) -> Result<(), UdoError> {
        let op = format!("UdoWrite({:#06X}, {})[{}]", index, offset, data.len());
        if data.len() > UDO_MAX_PAYLOAD_LEN {
            return Err(UdoError::DataTooBig(format!(
                "{}: write data is too big: {}",
                op,
                data.len()
            )));
        }
        self.do_read_write(true, index, offset, None, data, &op)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    /// A scripted UDP socket: every queued entry answers one send.
    struct ScriptedSocket {
        open: bool,
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Option<Vec<u8>>>,
    }

    impl ScriptedSocket {
        fn new() -> Self {
            Self {
                open: true,
                sent: Vec::new(),
                replies: VecDeque::new(),
            }
        }

        fn queue(&mut self, reply: Option<Vec<u8>>) {
            self.replies.push_back(reply);
        }

        fn reply_to(header: IpRqHeader, payload: &[u8]) -> Vec<u8> {
            let mut buf = alloc::vec![0u8; UDOIP_HEADER_SIZE + payload.len()];
            header.serialize(&mut buf).unwrap();
            buf[UDOIP_HEADER_SIZE..].copy_from_slice(payload);
            buf
        }
    }

    impl UdpInterface for ScriptedSocket {
        fn open(&mut self) -> Result<(), UdoError> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn send(&mut self, datagram: &[u8]) -> Result<(), UdoError> {
            self.sent.push(datagram.to_vec());
            Ok(())
        }

        fn recv(
            &mut self,
            buffer: &mut [u8],
            _timeout: Duration,
        ) -> Result<Option<usize>, UdoError> {
            match self.replies.pop_front().flatten() {
                Some(reply) => {
                    buffer[..reply.len()].copy_from_slice(&reply);
                    Ok(Some(reply.len()))
                }
                None => Ok(None),
            }
        }

        fn describe(&self) -> String {
            String::from("127.0.0.1:1221")
        }
    }

    #[test]
    fn test_read_roundtrip() {
        let mut socket = ScriptedSocket::new();
        // First request of this handler gets rqid 1.
        let mut header = IpRqHeader::read_request(1, 0x0002, 0, 4);
        header.set_len(4);
        socket.queue(Some(ScriptedSocket::reply_to(header, &[1, 2, 3, 4])));

        let mut handler = IpHandler::new(socket);
        let mut data = [0u8; 4];
        let r = handler.udo_read(0x0002, 0, &mut data).unwrap();
        assert_eq!(r, 4);
        assert_eq!(data, [1, 2, 3, 4]);

        // Outgoing datagram is a bare 16-byte header for reads.
        assert_eq!(handler.link().sent.len(), 1);
        assert_eq!(
            handler.link().sent[0],
            [
                0x01, 0x00, 0x00, 0x00, 0x04, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_write_carries_payload() {
        let mut socket = ScriptedSocket::new();
        let mut header = IpRqHeader::write_request(1, 0x0010, 8, 2);
        header.set_len(0);
        socket.queue(Some(ScriptedSocket::reply_to(header, &[])));

        let mut handler = IpHandler::new(socket);
        handler.udo_write(0x0010, 8, &[0xAA, 0xBB]).unwrap();

        let sent = &handler.link().sent[0];
        assert_eq!(sent.len(), UDOIP_HEADER_SIZE + 2);
        assert_eq!(&sent[UDOIP_HEADER_SIZE..], &[0xAA, 0xBB]);
        let sent_header = IpRqHeader::deserialize(sent).unwrap();
        assert!(sent_header.is_write());
        assert_eq!(sent_header.len(), 2);
    }

    #[test]
    fn test_timeout_retries_then_fails() {
        let mut socket = ScriptedSocket::new();
        for _ in 0..UDOIP_MAX_TRIES {
            socket.queue(None);
        }

        let mut handler = IpHandler::new(socket);
        let mut data = [0u8; 4];
        assert!(matches!(
            handler.udo_read(0x0002, 0, &mut data),
            Err(UdoError::Timeout(_))
        ));
        // At most max_tries datagrams went out.
        assert_eq!(handler.link().sent.len() as u32, UDOIP_MAX_TRIES);
    }

    #[test]
    fn test_identity_mismatch_discarded_and_retried() {
        let mut socket = ScriptedSocket::new();
        // First reply carries the wrong rqid, second one matches.
        let mut stale = IpRqHeader::read_request(0, 0x0002, 0, 4);
        stale.set_len(4);
        socket.queue(Some(ScriptedSocket::reply_to(stale, &[9, 9, 9, 9])));
        let mut good = IpRqHeader::read_request(1, 0x0002, 0, 4);
        good.set_len(4);
        socket.queue(Some(ScriptedSocket::reply_to(good, &[1, 2, 3, 4])));

        let mut handler = IpHandler::new(socket);
        let mut data = [0u8; 4];
        let r = handler.udo_read(0x0002, 0, &mut data).unwrap();
        assert_eq!(r, 4);
        assert_eq!(data, [1, 2, 3, 4]);
        assert_eq!(handler.link().sent.len(), 2);

        // The retransmission reused the same sequence number.
        let first = IpRqHeader::deserialize(&handler.link().sent[0]).unwrap();
        let second = IpRqHeader::deserialize(&handler.link().sent[1]).unwrap();
        assert_eq!(first.rqid, second.rqid);
    }

    #[test]
    fn test_mismatches_exhaust_as_connection_error() {
        let mut socket = ScriptedSocket::new();
        for _ in 0..UDOIP_MAX_TRIES {
            let mut stale = IpRqHeader::read_request(99, 0x0002, 0, 4);
            stale.set_len(4);
            socket.queue(Some(ScriptedSocket::reply_to(stale, &[0, 0, 0, 0])));
        }

        let mut handler = IpHandler::new(socket);
        let mut data = [0u8; 4];
        assert!(matches!(
            handler.udo_read(0x0002, 0, &mut data),
            Err(UdoError::Connection(_))
        ));
    }

    #[test]
    fn test_short_datagram_retried() {
        let mut socket = ScriptedSocket::new();
        socket.queue(Some(alloc::vec![0u8; 4])); // truncated
        let mut good = IpRqHeader::read_request(1, 0x0002, 0, 4);
        good.set_len(2);
        socket.queue(Some(ScriptedSocket::reply_to(good, &[7, 8])));

        let mut handler = IpHandler::new(socket);
        let mut data = [0u8; 4];
        assert_eq!(handler.udo_read(0x0002, 0, &mut data).unwrap(), 2);
    }

    #[test]
    fn test_error_response_raises_device_code() {
        let mut socket = ScriptedSocket::new();
        let mut header = IpRqHeader::read_request(1, 0x0002, 0, 4);
        header.set_len(crate::frame::ip::UDOIP_ERROR_LEN);
        socket.queue(Some(ScriptedSocket::reply_to(
            header,
            &0x2000u16.to_le_bytes(),
        )));

        let mut handler = IpHandler::new(socket);
        let mut data = [0u8; 4];
        match handler.udo_read(0x0002, 0, &mut data) {
            Err(UdoError::Device { ecode, .. }) => assert_eq!(ecode, 0x2000),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_sequence_number_increments_per_request() {
        let mut socket = ScriptedSocket::new();
        for rqid in 1..=2u32 {
            let mut header = IpRqHeader::read_request(rqid, 0x0002, 0, 4);
            header.set_len(1);
            socket.queue(Some(ScriptedSocket::reply_to(header, &[0])));
        }

        let mut handler = IpHandler::new(socket);
        let mut data = [0u8; 4];
        handler.udo_read(0x0002, 0, &mut data).unwrap();
        handler.udo_read(0x0002, 0, &mut data).unwrap();

        let first = IpRqHeader::deserialize(&handler.link().sent[0]).unwrap();
        let second = IpRqHeader::deserialize(&handler.link().sent[1]).unwrap();
        assert_eq!(first.rqid + 1, second.rqid);
    }
}
