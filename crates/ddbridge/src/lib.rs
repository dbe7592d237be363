//! # ddbridge
//!
//! Streams media bytes from a host into the demux/decode engine and hands
//! decoded frames back, with both sides sharing one flat arena.
//!
//! Features:
//! - Two-phase negotiate/commit writes into a page-granular arena
//! - Bulk preload and incremental streaming over the same store
//! - Engine-driven pull feeding with backlog-based backpressure
//! - Synchronous, re-entrant callbacks for stream selection, packets and frames

pub mod arena;
mod bridge;
mod decode;
mod demux;
mod feed;
pub mod lifecycle;
mod session;
pub mod store;

pub use arena::Region;
pub use bridge::Bridge;
pub use decode::FrameView;
pub use feed::FeedSummary;
pub use lifecycle::DemuxPhase;
pub use session::Reentry;
pub use store::{Purpose, WriteWindow};

pub use ddbridge_core::status::ERROR_STREAM_INDEX;
pub use ddbridge_core::{DecodeStatus, Error, Result};
