// crates/udo-rs/tests/simulator/mod.rs
//! In-memory transports wiring master handlers directly to slave
//! engines, so the end-to-end scenarios run without serial devices or
//! sockets.

use std::collections::VecDeque;
use std::time::Duration;

use udo_rs::hal::{SerialInterface, SlaveUdpInterface, UdpInterface};
use udo_rs::slave::{IpSlave, SlSlave, UdoSlaveApp};
use udo_rs::types::IpAddress;
use udo_rs::UdoError;

/// A serial line with a UDO-SL slave engine on the far end.
///
/// Master writes are fed straight into the slave; the slave's replies
/// queue up for the master's next `recv`.
pub struct SimulatedSerialDevice<A: UdoSlaveApp> {
    open: bool,
    slave: SlSlave,
    pub app: A,
    rx: VecDeque<u8>,
    /// Swallow the next N reply frames (line noise towards the master).
    pub drop_replies: u32,
}

impl<A: UdoSlaveApp> SimulatedSerialDevice<A> {
    pub fn new(app: A) -> Self {
        Self {
            open: false,
            slave: SlSlave::new(),
            app,
            rx: VecDeque::new(),
            drop_replies: 0,
        }
    }
}

impl<A: UdoSlaveApp> SerialInterface for SimulatedSerialDevice<A> {
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

    fn flush(&mut self) -> Result<(), UdoError> {
        self.rx.clear();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), UdoError> {
        if !self.open {
            return Err(UdoError::Connection("line closed".into()));
        }
        for &b in data {
            if let Some(reply) = self.slave.process_byte(b, &mut self.app) {
                if self.drop_replies > 0 {
                    self.drop_replies -= 1;
                } else {
                    self.rx.extend(reply.iter().copied());
                }
            }
        }
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8], _timeout: Duration) -> Result<usize, UdoError> {
        let mut n = 0;
        while n < buffer.len() {
            match self.rx.pop_front() {
                Some(b) => {
                    buffer[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n) // 0 models the inter-byte timeout
    }

    fn describe(&self) -> String {
        String::from("sim-serial")
    }
}

/// Address the simulated master appears under at the slave.
pub const SIM_CLIENT_ADDR: IpAddress = [127, 0, 0, 1];
pub const SIM_CLIENT_PORT: u16 = 40000;

/// In-memory datagram pipe: one end for the slave engine, returned
/// replies buffered for the master.
#[derive(Default)]
pub struct SimulatedSlavePort {
    requests: VecDeque<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
}

impl SlaveUdpInterface for SimulatedSlavePort {
    fn recv_from(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<Option<(usize, IpAddress, u16)>, UdoError> {
        match self.requests.pop_front() {
            Some(datagram) => {
                let n = datagram.len().min(buffer.len());
                buffer[..n].copy_from_slice(&datagram[..n]);
                Ok(Some((n, SIM_CLIENT_ADDR, SIM_CLIENT_PORT)))
            }
            None => Ok(None),
        }
    }

    fn send_to(&mut self, data: &[u8], _addr: IpAddress, _port: u16) -> Result<(), UdoError> {
        self.replies.push_back(data.to_vec());
        Ok(())
    }
}

/// A UDP "network" with a UDO-IP slave engine on the far end.
pub struct SimulatedUdpNetwork<A: UdoSlaveApp> {
    open: bool,
    slave: IpSlave,
    port: SimulatedSlavePort,
    pub app: A,
    /// Swallow the next N replies (simulated datagram loss).
    pub drop_replies: u32,
}

impl<A: UdoSlaveApp> SimulatedUdpNetwork<A> {
    pub fn new(app: A) -> Self {
        Self {
            open: false,
            slave: IpSlave::new(),
            port: SimulatedSlavePort::default(),
            app,
            drop_replies: 0,
        }
    }
}

impl<A: UdoSlaveApp> UdpInterface for SimulatedUdpNetwork<A> {
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
        if !self.open {
            return Err(UdoError::Connection("socket closed".into()));
        }
        self.port.requests.push_back(datagram.to_vec());
        self.slave.poll(&mut self.port, &mut self.app)?;
        if self.drop_replies > 0 {
            self.drop_replies -= 1;
            self.port.replies.pop_front();
        }
        Ok(())
    }

    fn recv(
        &mut self,
        buffer: &mut [u8],
        _timeout: Duration,
    ) -> Result<Option<usize>, UdoError> {
        match self.port.replies.pop_front() {
            Some(reply) => {
                let n = reply.len().min(buffer.len());
                buffer[..n].copy_from_slice(&reply[..n]);
                Ok(Some(n))
            }
            None => Ok(None), // models the receive timeout
        }
    }

    fn describe(&self) -> String {
        String::from("sim-udp")
    }
}
