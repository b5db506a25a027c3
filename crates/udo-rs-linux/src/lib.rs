// crates/udo-rs-linux/src/lib.rs
//! PC implementations of the udo-rs HAL traits: a `serialport`-backed
//! serial line for UDO-SL and `std::net::UdpSocket`s for both sides of
//! UDO-IP.

pub mod config;

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use log::warn;
use serialport::{ClearBuffer, SerialPort};
use udo_rs::hal::{SerialInterface, SlaveUdpInterface, UdpInterface};
use udo_rs::types::{IpAddress, UDOIP_DEFAULT_PORT};
use udo_rs::UdoError;

/// Default baud rate of a UDO-SL device link.
pub const UDOSL_DEFAULT_BAUDRATE: u32 = 1_000_000;

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// A serial device speaking UDO-SL, e.g. `/dev/ttyACM0`.
pub struct LinuxSerialLink {
    devstr: String,
    pub baudrate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl LinuxSerialLink {
    pub fn new(devstr: &str) -> Self {
        Self {
            devstr: devstr.to_string(),
            baudrate: UDOSL_DEFAULT_BAUDRATE,
            port: None,
        }
    }
}

impl SerialInterface for LinuxSerialLink {
    fn open(&mut self) -> Result<(), UdoError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(self.devstr.as_str(), self.baudrate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                UdoError::Connection(format!(
                    "UDO-SL: error opening device \"{}\": {}",
                    self.devstr, e
                ))
            })?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn flush(&mut self) -> Result<(), UdoError> {
        if let Some(port) = &mut self.port {
            port.clear(ClearBuffer::All)
                .map_err(|e| UdoError::Connection(format!("UDO-SL: flush error: {}", e)))?;
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), UdoError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| UdoError::Connection("UDO-SL: device not open".into()))?;
        port.write_all(data)
            .map_err(|e| UdoError::Connection(format!("UDO-SL: send error: {}", e)))
    }

    fn recv(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, UdoError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| UdoError::Connection("UDO-SL: device not open".into()))?;
        if port.timeout() != timeout {
            port.set_timeout(timeout)
                .map_err(|e| UdoError::Connection(format!("UDO-SL: timeout setup: {}", e)))?;
        }
        match port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(UdoError::Connection(format!(
                "UDO-SL: receive error: {}",
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        self.devstr.clone()
    }
}

/// The master side of a UDO-IP link: one UDP socket directed at a
/// single slave, addressed as `"host:port"` (port defaults to 1221).
pub struct LinuxUdpLink {
    pub ipaddrstr: String,
    socket: Option<UdpSocket>,
}

impl LinuxUdpLink {
    pub fn new(ipaddrstr: &str) -> Self {
        Self {
            ipaddrstr: ipaddrstr.to_string(),
            socket: None,
        }
    }

    fn target(&self) -> String {
        if self.ipaddrstr.contains(':') {
            self.ipaddrstr.clone()
        } else {
            format!("{}:{}", self.ipaddrstr, UDOIP_DEFAULT_PORT)
        }
    }
}

impl UdpInterface for LinuxUdpLink {
    fn open(&mut self) -> Result<(), UdoError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .map_err(|e| UdoError::Connection(format!("UDO-IP: error creating socket: {}", e)))?;
        socket.connect(self.target()).map_err(|e| {
            UdoError::Connection(format!(
                "UDO-IP: invalid address \"{}\": {}",
                self.ipaddrstr, e
            ))
        })?;
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) {
        self.socket = None;
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), UdoError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| UdoError::Connection("UDO-IP: socket not open".into()))?;
        socket
            .send(datagram)
            .map_err(|e| UdoError::Connection(format!("UDO-IP: send error: {}", e)))?;
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<Option<usize>, UdoError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| UdoError::Connection("UDO-IP: socket not open".into()))?;
        socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| UdoError::Connection(format!("UDO-IP: timeout setup: {}", e)))?;
        match socket.recv(buffer) {
            Ok(n) => Ok(Some(n)),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(UdoError::Connection(format!(
                "UDO-IP: receive error: {}",
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        self.ipaddrstr.clone()
    }
}

/// The slave side of a UDO-IP port: a bound UDP socket polled with a
/// bounded 1 ms wait, so the outer loop neither blocks nor spins.
pub struct LinuxSlaveUdpPort {
    socket: UdpSocket,
}

impl LinuxSlaveUdpPort {
    /// Binds to all interfaces on `port` (0 picks an ephemeral port).
    pub fn bind(port: u16) -> Result<Self, UdoError> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(|e| {
            UdoError::Connection(format!(
                "UDO-IP slave: bind error (is another slave already running?): {}",
                e
            ))
        })?;
        socket
            .set_read_timeout(Some(Duration::from_millis(1)))
            .map_err(|e| UdoError::Connection(format!("UDO-IP slave: timeout setup: {}", e)))?;
        Ok(Self { socket })
    }

    /// The actually bound port, useful after binding port 0.
    pub fn local_port(&self) -> Result<u16, UdoError> {
        self.socket
            .local_addr()
            .map(|a| a.port())
            .map_err(|e| UdoError::Connection(format!("UDO-IP slave: local_addr: {}", e)))
    }
}

impl SlaveUdpInterface for LinuxSlaveUdpPort {
    fn recv_from(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<Option<(usize, IpAddress, u16)>, UdoError> {
        match self.socket.recv_from(buffer) {
            Ok((n, SocketAddr::V4(src))) => Ok(Some((n, src.ip().octets(), src.port()))),
            Ok((_, SocketAddr::V6(src))) => {
                warn!("UDO-IP slave: ignoring IPv6 datagram from {}", src);
                Ok(None)
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(UdoError::Connection(format!(
                "UDO-IP slave: receive error: {}",
                e
            ))),
        }
    }

    fn send_to(&mut self, data: &[u8], addr: IpAddress, port: u16) -> Result<(), UdoError> {
        self.socket
            .send_to(data, (Ipv4Addr::from(addr), port))
            .map_err(|e| UdoError::Connection(format!("UDO-IP slave: send error: {}", e)))?;
        Ok(())
    }
}
