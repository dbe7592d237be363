//! # ddbridge-engine
//!
//! The demux/decode engine that sits on the far side of the ddbridge
//! boundary. The orchestration layer only ever sees it through
//! [`ContainerReader`] and [`FrameDecoder`].
//!
//! Features:
//! - Incremental RIFF/WAVE, RIFF/AVI and YUV4MPEG2 readers
//! - PCM decoding via symphonia, re-cut into fixed-size f32 frames
//! - Raw video pass-through with bottom-up row flipping
//! - Synthetic sample files for tests and demos

pub mod codec;
pub mod container;
pub mod synth;

use ddbridge_core::{EngineConfig, Result, StreamInfo};
use tracing::debug;

pub use codec::{DecodedFrame, FrameDecoder};
pub use container::{ContainerKind, ContainerReader, Step};

/// Factory for readers and decoders sharing one configuration.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub const fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Identify the container at the front of `buf`, or `None` if more bytes are needed.
    pub fn detect(&self, buf: &[u8], eof: bool) -> Result<Option<ContainerKind>> {
        ContainerKind::detect(buf, eof)
    }

    /// Build a reader for a detected container.
    pub fn open_reader(&self, kind: ContainerKind) -> Box<dyn ContainerReader> {
        debug!("Opening {} reader", kind.name());
        container::reader_for(kind, &self.config)
    }

    /// Build a decoder for one stream.
    pub fn make_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn FrameDecoder>> {
        codec::make_decoder(stream, &self.config)
    }
}
