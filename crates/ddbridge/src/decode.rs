//! Per-stream decoding and frame delivery.
//!
//! Decoders are created lazily, on the first decode for their stream. Every
//! decoded frame is staged in its arena region, handed to the host as a
//! [`FrameView`] borrowing that region, and cleared once the callback
//! returns.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use ddbridge_core::{DecodeStatus, Error, MediaKind, Result, StreamInfo};
use ddbridge_engine::{DecodedFrame, Engine, FrameDecoder};
use tracing::{debug, error, trace, warn};

use crate::arena::{Arena, Region};
use crate::session::Session;

/// A decoded frame, valid for the duration of the callback it is passed to.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub stream_index: u32,
    pub kind: MediaKind,
    /// Presentation timestamp in the stream's own units (frames or sample frames).
    pub pts: u64,
    /// Absolute arena offset of the frame bytes.
    pub offset: usize,
    pub data: &'a [u8],
}

impl FrameView<'_> {
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub(crate) type FrameSink<'a> = &'a mut dyn FnMut(FrameView<'_>);

/// Decoder instances keyed by stream index.
#[derive(Default)]
pub(crate) struct DecodeController {
    decoders: HashMap<u32, Box<dyn FrameDecoder>>,
}

impl DecodeController {
    fn decoder_for(
        &mut self,
        engine: &Engine,
        stream: &StreamInfo,
    ) -> Result<&mut Box<dyn FrameDecoder>> {
        match self.decoders.entry(stream.index) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let decoder = engine.make_decoder(stream)?;
                debug!("created decoder for stream {}", stream.index);
                Ok(entry.insert(decoder))
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.decoders.clear();
    }

    /// Take every decoder out, ordered by stream index.
    fn drain_sorted(&mut self) -> Vec<(u32, Box<dyn FrameDecoder>)> {
        let mut decoders: Vec<_> = self.decoders.drain().collect();
        decoders.sort_by_key(|(index, _)| *index);
        decoders
    }
}

/// Stage `frame` in its region and hand it to the matching callback.
fn deliver(
    arena: &mut Arena,
    frame: &DecodedFrame,
    on_video_frame: FrameSink<'_>,
    on_audio_frame: FrameSink<'_>,
) -> Result<()> {
    let region = match frame.kind {
        MediaKind::Video => Region::VideoFrame,
        MediaKind::Audio => Region::AudioFrame,
        MediaKind::Other => {
            warn!("dropping frame of stream {} with no media kind", frame.stream_index);
            return Ok(());
        }
    };

    let offset = arena.stage(region, &frame.data)?;
    trace!(
        "{:?} frame of stream {} at {} ({} bytes, pts {})",
        frame.kind,
        frame.stream_index,
        offset,
        frame.data.len(),
        frame.pts
    );
    let view = FrameView {
        stream_index: frame.stream_index,
        kind: frame.kind,
        pts: frame.pts,
        offset,
        data: arena.view(offset, frame.data.len()),
    };
    if region == Region::VideoFrame {
        on_video_frame(view);
    } else {
        on_audio_frame(view);
    }
    arena.clear(region);
    Ok(())
}

impl Session {
    /// Decode the next queued packet of `stream_index`.
    pub(crate) fn decode(
        &mut self,
        stream_index: u32,
        on_video_frame: FrameSink<'_>,
        on_audio_frame: FrameSink<'_>,
    ) -> Result<DecodeStatus> {
        self.lifecycle.require_decoder()?;
        self.lifecycle.check_selection_source()?;

        let Some(stream) = self.streams.iter().find(|s| s.index == stream_index) else {
            return Err(Error::decode(stream_index, "stream was never announced"));
        };
        let packet = self
            .queues
            .get_mut(&stream_index)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| Error::decode(stream_index, "no packet queued for this stream"))?;

        let decoder = match self.decoder.decoder_for(&self.engine, stream) {
            Ok(decoder) => decoder,
            Err(e) => {
                error!("Failed to create decoder for stream {stream_index}: {e}");
                return Err(e);
            }
        };
        if let Err(e) = decoder.send_packet(&packet) {
            error!("Decode failed on stream {stream_index} at pts {}: {e}", packet.pts);
            return Err(e);
        }

        let mut frames = 0;
        while let Some(frame) = decoder.receive_frame() {
            deliver(&mut self.arena, &frame, on_video_frame, on_audio_frame)?;
            frames += 1;
        }

        Ok(if frames > 0 {
            DecodeStatus::FrameEmitted
        } else {
            DecodeStatus::NoFrame
        })
    }

    /// Flush every decoder through the callbacks, then close the decoder handle.
    pub(crate) fn close_decoder(
        &mut self,
        on_video_frame: FrameSink<'_>,
        on_audio_frame: FrameSink<'_>,
    ) -> Result<()> {
        self.lifecycle.require_decoder()?;

        let mut flushed = 0;
        let mut outcome = Ok(());
        for (stream_index, mut decoder) in self.decoder.drain_sorted() {
            decoder.flush();
            while let Some(frame) = decoder.receive_frame() {
                if outcome.is_ok() {
                    outcome = deliver(&mut self.arena, &frame, on_video_frame, on_audio_frame);
                    flushed += 1;
                } else {
                    trace!("dropping flushed frame of stream {stream_index}");
                }
            }
        }

        self.lifecycle.close_decoder()?;
        self.arena.release(Region::VideoFrame);
        self.arena.release(Region::AudioFrame);
        debug!("flushed {flushed} frames on decoder close");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Purpose;
    use crate::Bridge;
    use ddbridge_core::{BridgeConfig, Handle};
    use ddbridge_engine::synth::{self, AviOptions};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Load `bytes` in one commit and open the demuxer, keeping only the selection.
    fn bulk(bytes: &[u8]) -> Bridge {
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        bridge
            .write_with(bytes.len(), |window| {
                window.copy_from_slice(bytes);
                bytes.len()
            })
            .unwrap();
        bridge.open_demuxer(|_| {}, |_, _| {}).unwrap();
        bridge
    }

    #[test]
    fn test_decode_requires_open_decoder() {
        let mut bridge = bulk(&synth::y4m(4, 4, 1));
        let err = bridge.decode(0, |_| {}, |_| {}).unwrap_err();
        assert!(matches!(err, Error::NotOpen(Handle::Decoder)));
    }

    #[test]
    fn test_decode_unannounced_stream() {
        let mut bridge = bulk(&synth::y4m(4, 4, 1));
        bridge.open_decoder().unwrap();
        let err = bridge.decode(7, |_| {}, |_| {}).unwrap_err();
        assert!(matches!(err, Error::Decode { stream_index: 7, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_decode_empty_queue() {
        let mut bridge = bulk(&synth::y4m(4, 4, 1));
        bridge.open_decoder().unwrap();
        assert_eq!(
            bridge.decode(0, |_| {}, |_| {}).unwrap(),
            DecodeStatus::FrameEmitted
        );
        let err = bridge.decode(0, |_| {}, |_| {}).unwrap_err();
        assert!(matches!(err, Error::Decode { stream_index: 0, .. }));
    }

    #[test]
    fn test_video_frames_land_in_the_arena() {
        let mut bridge = bulk(&synth::y4m(8, 4, 2));
        bridge.open_decoder().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..2 {
            let seen = Rc::clone(&seen);
            bridge
                .decode(
                    0,
                    move |frame| seen.borrow_mut().push((frame.pts, frame.data.to_vec())),
                    |_| panic!("no audio in a y4m file"),
                )
                .unwrap();
        }
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[1].0, 1);
        assert_eq!(seen[0].1.len(), 8 * 4 + 2 * 4 * 2);
        // The gradient shifts by one per frame.
        assert_eq!(seen[1].1[0], seen[0].1[0] + 1);
    }

    #[test]
    fn test_decode_between_negotiate_and_commit() {
        let file = synth::y4m(16, 16, 2);
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        bridge.open_demuxer(|_| {}, |_, _| {}).unwrap();
        bridge
            .write_with(file.len(), |window| {
                window.copy_from_slice(&file);
                file.len()
            })
            .unwrap();
        bridge.open_decoder().unwrap();

        let window = bridge.negotiate_capacity(Purpose::StoreWrite, 4).unwrap();
        let mut frames = 0;
        for _ in 0..2 {
            bridge.decode(0, |_| frames += 1, |_| {}).unwrap();
        }
        assert_eq!(frames, 2);
        bridge.window_mut(&window).unwrap().copy_from_slice(b"FRAM");
        bridge.commit_write(Purpose::StoreWrite, 4).unwrap();
        assert_eq!(bridge.store_len().unwrap(), file.len() as u64 + 4);
    }

    #[test]
    fn test_audio_buffers_until_close() {
        let config = BridgeConfig {
            engine: ddbridge_core::EngineConfig {
                pcm_frames_per_packet: 100,
                audio_frame_samples: 256,
                ..Default::default()
            },
            ..BridgeConfig::default()
        };
        let wav = synth::wav(8000, 1, 100);
        let mut bridge = Bridge::new(config).unwrap();
        bridge.open_store().unwrap();
        bridge
            .write_with(wav.len(), |window| {
                window.copy_from_slice(&wav);
                wav.len()
            })
            .unwrap();
        bridge.open_demuxer(|_| {}, |_, _| {}).unwrap();
        bridge.open_decoder().unwrap();

        // 100 samples do not fill a 256-sample frame.
        assert_eq!(
            bridge.decode(0, |_| {}, |_| {}).unwrap(),
            DecodeStatus::NoFrame
        );

        let mut flushed = Vec::new();
        bridge
            .close_decoder(|_| {}, |frame| flushed.push(frame.len()))
            .unwrap();
        assert_eq!(flushed, vec![100 * 4]);
        assert!(matches!(
            bridge.close_decoder(|_| {}, |_| {}),
            Err(Error::NotOpen(Handle::Decoder))
        ));
    }

    #[test]
    fn test_unsupported_codec_is_decode_error() {
        let mut avi = synth::avi(&AviOptions::new(2, 2, 1));
        // Swap BI_RGB for an MJPG compression tag in the bitmap header.
        let at = avi
            .windows(4)
            .position(|w| w == b"strf")
            .map(|p| p + 8 + 16)
            .unwrap();
        avi[at..at + 4].copy_from_slice(b"MJPG");
        let mut bridge = bulk(&avi);
        bridge.open_decoder().unwrap();
        let err = bridge.decode(0, |_| {}, |_| {}).unwrap_err();
        assert!(matches!(err, Error::Decode { stream_index: 0, .. }));
    }
}
