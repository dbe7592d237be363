//! Uncompressed video: every packet is exactly one frame.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;

use ddbridge_core::{
    CodecParams, EngineConfig, Error, MediaKind, Packet, PixelFormat, Result, StreamInfo,
};
use tracing::trace;

use super::{DecodedFrame, FrameDecoder};

/// Pass-through decoder for raw frames.
pub struct RawVideoDecoder {
    stream_index: u32,
    pixel_format: PixelFormat,
    row_stride: usize,
    frame_size: usize,
    /// Reverse row order on output.
    flip: bool,
    ready: VecDeque<DecodedFrame>,
}

impl RawVideoDecoder {
    pub fn new(stream: &StreamInfo, config: &EngineConfig) -> Result<Self> {
        let CodecParams::RawVideo {
            width,
            height,
            pixel_format,
            bottom_up,
        } = stream.codec
        else {
            return Err(Error::decode(stream.index, "not a raw video stream"));
        };
        let (Some(row_stride), Some(frame_size)) = (
            pixel_format.row_stride(width),
            pixel_format.frame_size(width, height),
        ) else {
            return Err(Error::decode(
                stream.index,
                format!("{width}x{height} frames do not fit in memory"),
            ));
        };
        Ok(Self {
            stream_index: stream.index,
            pixel_format,
            row_stride,
            frame_size,
            flip: bottom_up && config.flip_bottom_up && !pixel_format.is_planar(),
            ready: VecDeque::new(),
        })
    }
}

impl FrameDecoder for RawVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if packet.len() != self.frame_size {
            return Err(Error::decode(
                self.stream_index,
                format!(
                    "{:?} frame is {} bytes, expected {}",
                    self.pixel_format,
                    packet.len(),
                    self.frame_size
                ),
            ));
        }

        let data = if self.flip {
            packet
                .data
                .chunks_exact(self.row_stride)
                .rev()
                .flatten()
                .copied()
                .collect()
        } else {
            packet.data.to_vec()
        };

        trace!("raw video frame {} ({} bytes)", packet.pts, data.len());
        self.ready.push_back(DecodedFrame {
            stream_index: self.stream_index,
            kind: MediaKind::Video,
            pts: packet.pts,
            data,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Option<DecodedFrame> {
        self.ready.pop_front()
    }

    fn flush(&mut self) {}
}
