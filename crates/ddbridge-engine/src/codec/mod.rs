//! Frame decoders.
//!
//! A decoder accepts packets one at a time and hands back whatever frames
//! they completed. Decoders may buffer: a packet can complete zero, one, or
//! several frames, and [`FrameDecoder::flush`] releases what is left.

pub mod pcm;
pub mod rawvideo;

use ddbridge_core::{CodecParams, EngineConfig, Error, MediaKind, Packet, Result, StreamInfo};

pub use pcm::PcmDecoder;
pub use rawvideo::RawVideoDecoder;

/// One decoded unit ready to be copied into the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub stream_index: u32,
    pub kind: MediaKind,
    /// Video: frame number. Audio: index of the first sample frame.
    pub pts: u64,
    /// Video: the frame in its stream pixel format, top row first.
    /// Audio: interleaved `f32` little-endian samples.
    pub data: Vec<u8>,
}

/// Packet-in, frames-out decoder for one stream.
pub trait FrameDecoder {
    /// Decode one packet. Completed frames become available from
    /// [`receive_frame`](Self::receive_frame).
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Next completed frame, in decode order.
    fn receive_frame(&mut self) -> Option<DecodedFrame>;

    /// Release buffered data as final frames.
    fn flush(&mut self);
}

/// Build a decoder for a stream.
pub fn make_decoder(stream: &StreamInfo, config: &EngineConfig) -> Result<Box<dyn FrameDecoder>> {
    match &stream.codec {
        CodecParams::Pcm { .. } => Ok(Box::new(PcmDecoder::new(stream, config)?)),
        CodecParams::RawVideo { .. } => Ok(Box::new(RawVideoDecoder::new(stream, config)?)),
        CodecParams::Unsupported { tag } => Err(Error::decode(
            stream.index,
            format!("no decoder for codec '{tag}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_codec_has_no_decoder() {
        let stream = StreamInfo::new(
            2,
            MediaKind::Video,
            CodecParams::Unsupported { tag: "MJPG".into() },
        );
        match make_decoder(&stream, &EngineConfig::default()) {
            Err(Error::Decode { stream_index, message }) => {
                assert_eq!(stream_index, 2);
                assert!(message.contains("MJPG"));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("unsupported codec produced a decoder"),
        }
    }
}
