// crates/udo-rs/src/hal.rs
use crate::types::{
    IpAddress, UDOERR_APPLICATION, UDOERR_CONNECTION, UDOERR_CRC, UDOERR_DATA_TOO_BIG,
    UDOERR_TIMEOUT,
};
use alloc::string::String;
use core::fmt;
use core::time::Duration;

/// Defines a portable, descriptive error type for the UDO stack.
///
/// Every variant maps to a stable numeric code (`ecode`) so that errors
/// can travel inside error responses on the wire; the message carries
/// human-readable context, usually naming the operation that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdoError {
    /// Transport open/send/receive failure or a malformed response.
    Connection(String),
    /// No reply (or no next byte on the serial line) within the timeout,
    /// after all retries were exhausted.
    Timeout(String),
    /// UDO-SL frame failed its CRC check.
    Crc(String),
    /// Payload exceeds `UDO_MAX_PAYLOAD_LEN` or the caller's buffer.
    DataTooBig(String),
    /// No usable transport configured, or a handler was misused.
    Application(String),
    /// An error code returned by the slave device; opaque to the framers.
    Device { ecode: u16, context: String },
}

impl UdoError {
    /// The stable numeric code of this error.
    pub fn ecode(&self) -> u16 {
        match self {
            Self::Connection(_) => UDOERR_CONNECTION,
            Self::Timeout(_) => UDOERR_TIMEOUT,
            Self::Crc(_) => UDOERR_CRC,
            Self::DataTooBig(_) => UDOERR_DATA_TOO_BIG,
            Self::Application(_) => UDOERR_APPLICATION,
            Self::Device { ecode, .. } => *ecode,
        }
    }
}

impl fmt::Display for UdoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::Crc(msg) => write!(f, "CRC error: {}", msg),
            Self::DataTooBig(msg) => write!(f, "data too big: {}", msg),
            Self::Application(msg) => write!(f, "application error: {}", msg),
            Self::Device { ecode, context } => {
                write!(f, "device error {:#06X}: {}", ecode, context)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for UdoError {}

/// Hardware abstraction for the master side of a UDO-SL link.
///
/// Implementations wrap a serial device (UART, USB-CDC, PTY). The core
/// never touches the device directly, which keeps the protocol logic
/// platform-agnostic (no_std).
pub trait SerialInterface {
    /// Acquires the serial device. Must be idempotent when already open.
    fn open(&mut self) -> Result<(), UdoError>;

    /// Releases the serial device. Must be idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Discards any pending input and output bytes.
    fn flush(&mut self) -> Result<(), UdoError>;

    /// Writes the whole buffer to the line.
    fn send(&mut self, data: &[u8]) -> Result<(), UdoError>;

    /// Reads whatever bytes are available, waiting at most `timeout` for
    /// the first one.
    ///
    /// Returns the number of bytes read; `Ok(0)` specifically means the
    /// timeout elapsed without any byte arriving.
    fn recv(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, UdoError>;

    /// Human-readable device description, e.g. the device path.
    fn describe(&self) -> String;
}

/// Hardware abstraction for the master side of a UDO-IP link.
///
/// The implementation owns one UDP socket directed at a single slave.
pub trait UdpInterface {
    /// Creates the socket. Must be idempotent when already open.
    fn open(&mut self) -> Result<(), UdoError>;

    /// Releases the socket. Must be idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Sends one datagram to the slave.
    fn send(&mut self, datagram: &[u8]) -> Result<(), UdoError>;

    /// Receives one datagram, waiting at most `timeout`.
    ///
    /// Returns `Ok(Some(size))` on success and `Ok(None)` when the
    /// timeout elapsed.
    fn recv(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<Option<usize>, UdoError>;

    /// Human-readable peer description, e.g. "host:port".
    fn describe(&self) -> String;
}

/// Hardware abstraction for the slave side of a UDO-IP port.
///
/// The implementation owns one bound UDP socket serving many clients.
pub trait SlaveUdpInterface {
    /// Receives one datagram without blocking beyond the port's bounded
    /// wait (at most ~1 ms, so the outer loop never busy-spins).
    ///
    /// Returns `Ok(Some((size, source_ip, source_port)))` on success and
    /// `Ok(None)` when nothing arrived.
    fn recv_from(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<Option<(usize, IpAddress, u16)>, UdoError>;

    /// Sends one datagram to a client.
    fn send_to(&mut self, data: &[u8], addr: IpAddress, port: u16) -> Result<(), UdoError>;
}
