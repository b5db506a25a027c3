// crates/udo-rs/src/frame/mod.rs
pub mod codec;
pub mod ip;
pub mod sl;

pub use codec::Codec;
pub use ip::IpRqHeader;
pub use sl::{SlDeframer, SlFrame, SlFrameMode, SlRequest};
