// crates/udo-rs/src/slave/ip.rs
//! The UDO-IP slave engine: datagram dispatch with an answer cache.
//!
//! UDP retransmissions must not execute a request twice, so the slave
//! keeps the last reply per client in a small cache keyed on the source
//! address and the request header. A retransmitted datagram is answered
//! from the cache without touching the application; a new request evicts
//! the oldest entry.

use crate::frame::Codec;
use crate::frame::ip::{IpRqHeader, UDOIP_ERROR_LEN};
use crate::hal::{SlaveUdpInterface, UdoError};
use crate::slave::{SlaveRequest, UdoSlaveApp};
use crate::types::{IpAddress, UDO_MAX_PAYLOAD_LEN, UDOIP_HEADER_SIZE, UDOIP_MAX_RQ_SIZE};
use log::{debug, error, trace};

/// Number of answer-cache entries. This is also the practical cap on
/// concurrent distinct clients.
pub const UDOIP_ANSCACHE_NUM: usize = 4;

/// One cached reply: the client, the request header it answered and the
/// ready-to-send reply datagram.
struct AnswerSlot {
    srcip: IpAddress,
    srcport: u16,
    header: IpRqHeader,
    /// Length of the request datagram the reply belongs to.
    rq_datalen: u16,
    reply_len: u16,
    reply: [u8; UDOIP_MAX_RQ_SIZE],
}

impl AnswerSlot {
    fn empty() -> Self {
        Self {
            srcip: [0; 4],
            srcport: 0,
            header: IpRqHeader::default(),
            rq_datalen: 0,
            reply_len: 0,
            reply: [0; UDOIP_MAX_RQ_SIZE],
        }
    }
}

/// The UDO-IP slave protocol engine.
///
/// The engine is transport-free; `poll` pulls one datagram from the
/// `SlaveUdpInterface`, runs the dispatch and sends the reply. Drive it
/// from the outer loop.
pub struct IpSlave {
    slots: [AnswerSlot; UDOIP_ANSCACHE_NUM],
    /// Slot indexes ordered oldest-first; rotated on each allocation.
    lru: [usize; UDOIP_ANSCACHE_NUM],
    rqbuf: [u8; UDOIP_MAX_RQ_SIZE],
    databuf: [u8; UDO_MAX_PAYLOAD_LEN],
}

impl IpSlave {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| AnswerSlot::empty()),
            lru: core::array::from_fn(|n| n),
            rqbuf: [0; UDOIP_MAX_RQ_SIZE],
            databuf: [0; UDO_MAX_PAYLOAD_LEN],
        }
    }

    /// Receives and serves at most one datagram.
    ///
    /// Returns `Ok(true)` when a datagram was handled. Reply send errors
    /// are logged, not surfaced: the slot stays valid, so the client's
    /// retransmission is answered from the cache.
    pub fn poll(
        &mut self,
        port: &mut dyn SlaveUdpInterface,
        app: &mut dyn UdoSlaveApp,
    ) -> Result<bool, UdoError> {
        let (datalen, srcip, srcport) = match port.recv_from(&mut self.rqbuf)? {
            Some(r) => r,
            None => return Ok(false),
        };

        if let Some(slot) = self.process_datagram(srcip, srcport, datalen, app) {
            let slot = &self.slots[slot];
            if let Err(e) = port.send_to(&slot.reply[..slot.reply_len as usize], srcip, srcport) {
                error!("UDO-IP slave: error sending back the answer: {}", e);
            }
        }
        Ok(true)
    }

    /// Runs the dedup lookup and, on a miss, the application dispatch.
    ///
    /// Returns the slot whose reply must be (re)sent, or `None` for
    /// datagrams too short to carry a request header.
    fn process_datagram(
        &mut self,
        srcip: IpAddress,
        srcport: u16,
        datalen: usize,
        app: &mut dyn UdoSlaveApp,
    ) -> Option<usize> {
        if datalen < UDOIP_HEADER_SIZE {
            debug!("UDO-IP slave: dropping short datagram ({} bytes)", datalen);
            return None;
        }

        // Codec::deserialize on a checked-length buffer cannot fail.
        let header = IpRqHeader::deserialize(&self.rqbuf[..datalen]).ok()?;

        if let Some(n) = self.find_cached(srcip, srcport, &header, datalen as u16) {
            trace!(
                "UDO-IP slave: resending cached answer for rqid {}",
                header.rqid
            );
            return Some(n);
        }

        let n = self.allocate_slot(srcip, srcport, &header, datalen as u16);
        self.execute(n, &header, datalen, app);
        Some(n)
    }

    /// Scans the cache for a previous, identical request from the same
    /// client: the reply was probably lost and must be resent as-is.
    fn find_cached(
        &self,
        srcip: IpAddress,
        srcport: u16,
        header: &IpRqHeader,
        datalen: u16,
    ) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.reply_len > 0
                && slot.srcip == srcip
                && slot.srcport == srcport
                && slot.header.rqid == header.rqid
                && slot.header.len_cmd == header.len_cmd
                && slot.header.index == header.index
                && slot.header.offset == header.offset
                && slot.rq_datalen == datalen
        })
    }

    /// Takes the oldest slot and moves it to the tail of the LRU order.
    fn allocate_slot(
        &mut self,
        srcip: IpAddress,
        srcport: u16,
        header: &IpRqHeader,
        datalen: u16,
    ) -> usize {
        let idx = self.lru[0];
        self.lru.rotate_left(1);

        let slot = &mut self.slots[idx];
        slot.srcip = srcip;
        slot.srcport = srcport;
        slot.header = *header;
        slot.rq_datalen = datalen;
        slot.reply_len = 0;
        idx
    }

    /// Decodes the request, invokes the application and builds the reply
    /// datagram in the slot.
    fn execute(&mut self, slot_idx: usize, header: &IpRqHeader, datalen: usize, app: &mut dyn UdoSlaveApp) {
        let iswrite = header.is_write();
        let rqlen = if iswrite {
            // The datagram length is authoritative for write payloads.
            (datalen - UDOIP_HEADER_SIZE) as u16
        } else {
            header.len()
        };

        if iswrite {
            let payload = &self.rqbuf[UDOIP_HEADER_SIZE..datalen];
            self.databuf[..payload.len()].copy_from_slice(payload);
        }

        let mut rq = SlaveRequest {
            iswrite,
            index: header.index,
            offset: header.offset,
            metadata: header.metadata,
            metalen: header.metalen(),
            rqlen,
            maxanslen: UDO_MAX_PAYLOAD_LEN as u16,
            anslen: 0,
            result: 0,
            data: &mut self.databuf,
        };
        app.udo_read_write(&mut rq);
        let (anslen, result) = (rq.anslen, rq.result);

        // Reply header: the request's, with the length field rewritten
        // to the actual answer length (all ones for an error).
        let mut ans_header = *header;
        let anslen = if result != 0 {
            ans_header.set_len(UDOIP_ERROR_LEN);
            self.databuf[..2].copy_from_slice(&result.to_le_bytes());
            2
        } else {
            ans_header.set_len(anslen);
            anslen as usize
        };

        let slot = &mut self.slots[slot_idx];
        // Serialization into the fixed-size slot buffer cannot fail.
        let _ = ans_header.serialize(&mut slot.reply[..UDOIP_HEADER_SIZE]);
        slot.reply[UDOIP_HEADER_SIZE..UDOIP_HEADER_SIZE + anslen]
            .copy_from_slice(&self.databuf[..anslen]);
        slot.reply_len = (UDOIP_HEADER_SIZE + anslen) as u16;
    }
}

impl Default for IpSlave {
    fn default() -> Self {
        Self::new()
    }
}
