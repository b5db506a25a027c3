#![cfg_attr(not(feature = "std"), no_std)]

// 'alloc' is used for dynamic allocation (e.g., Vec<u8> payloads)
extern crate alloc;

// --- Foundation Modules ---
pub mod types;
pub mod hal;
pub mod crc;

// --- Wire Codecs ---
pub mod frame;

// --- Protocol Roles ---
pub mod master;
pub mod slave;

// --- Top-level Exports ---
pub use hal::{SerialInterface, SlaveUdpInterface, UdoError, UdpInterface};
pub use frame::{Codec, IpRqHeader, SlDeframer, SlFrame, SlFrameMode};
pub use master::{IpHandler, NoneHandler, SerialHandler, UdoComm, UdoCommHandler};
pub use slave::{IpSlave, SlSlave, SlaveRequest, UdoSlaveApp, handle_base_objects};
pub use types::{UDO_MAX_PAYLOAD_LEN, UDOIP_DEFAULT_PORT};
