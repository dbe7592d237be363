//! Core domain types for ddbridge.

pub mod handle;
pub mod packet;
pub mod stream;

pub use handle::Handle;
pub use packet::Packet;
pub use stream::{CodecParams, MediaKind, PcmFormat, PixelFormat, StreamInfo};
