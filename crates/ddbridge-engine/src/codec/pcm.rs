//! PCM decoding using symphonia.
//!
//! Packets go through symphonia's PCM decoder, the resulting planes are
//! interleaved to `f32`, and the samples are re-cut into frames of
//! `audio_frame_samples` sample frames each.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;

use ddbridge_core::{
    CodecParams, EngineConfig, Error, MediaKind, Packet, PcmFormat, Result, StreamInfo,
};
use symphonia::core::{
    audio::{AudioBuffer, AudioBufferRef, Channels, Signal},
    codecs::{
        CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_PCM_ALAW,
        CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_MULAW, CODEC_TYPE_PCM_S16LE,
        CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8,
    },
    conv::IntoSample,
    formats,
    sample::Sample,
};
use tracing::{debug, trace};

use super::{DecodedFrame, FrameDecoder};

/// Channel counts symphonia can describe with a plain channel mask.
const MAX_CHANNELS: u16 = 8;

const fn codec_type(format: PcmFormat) -> CodecType {
    match format {
        PcmFormat::U8 => CODEC_TYPE_PCM_U8,
        PcmFormat::S16Le => CODEC_TYPE_PCM_S16LE,
        PcmFormat::S24Le => CODEC_TYPE_PCM_S24LE,
        PcmFormat::S32Le => CODEC_TYPE_PCM_S32LE,
        PcmFormat::F32Le => CODEC_TYPE_PCM_F32LE,
        PcmFormat::F64Le => CODEC_TYPE_PCM_F64LE,
        PcmFormat::ALaw => CODEC_TYPE_PCM_ALAW,
        PcmFormat::MuLaw => CODEC_TYPE_PCM_MULAW,
    }
}

/// PCM decoder producing fixed-size interleaved `f32` frames.
pub struct PcmDecoder {
    stream_index: u32,
    decoder: Box<dyn Decoder>,
    channels: usize,
    block_align: usize,
    /// Largest slice handed to symphonia in one call.
    max_chunk_bytes: usize,
    /// Interleaved samples per emitted frame.
    frame_samples: usize,
    pending: Vec<f32>,
    /// Sample-frame position of `pending[0]`.
    pending_pts: Option<u64>,
    ready: VecDeque<DecodedFrame>,
}

impl PcmDecoder {
    pub fn new(stream: &StreamInfo, config: &EngineConfig) -> Result<Self> {
        let CodecParams::Pcm {
            format,
            sample_rate,
            channels,
            block_align,
        } = stream.codec
        else {
            return Err(Error::decode(stream.index, "not a PCM stream"));
        };
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(Error::decode(
                stream.index,
                format!("{channels} channels are not supported"),
            ));
        }

        let max_frames = config.pcm_frames_per_packet.max(1);
        let mut params = CodecParameters::new();
        params
            .for_codec(codec_type(format))
            .with_sample_rate(sample_rate)
            .with_channels(Channels::from_bits_truncate((1u32 << channels) - 1))
            .with_bits_per_coded_sample(u32::from(format.bits_per_sample()))
            .with_max_frames_per_packet(max_frames as u64);
        if matches!(
            format,
            PcmFormat::U8 | PcmFormat::S16Le | PcmFormat::S24Le | PcmFormat::S32Le
        ) {
            params.with_bits_per_sample(u32::from(format.bits_per_sample()));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::decode(stream.index, format!("Failed to create decoder: {e}")))?;

        debug!(
            "PCM decoder for stream {}: {format:?}, {sample_rate} Hz, {channels} channels",
            stream.index
        );

        let channels = usize::from(channels);
        Ok(Self {
            stream_index: stream.index,
            decoder,
            channels,
            block_align: usize::from(block_align),
            max_chunk_bytes: max_frames * usize::from(block_align),
            frame_samples: config.audio_frame_samples.max(1) * channels,
            pending: Vec::new(),
            pending_pts: None,
            ready: VecDeque::new(),
        })
    }

    /// Move the first `samples` pending samples into a frame.
    fn emit(&mut self, samples: usize) {
        let pts = self.pending_pts.unwrap_or(0);
        let data: Vec<u8> = self
            .pending
            .drain(..samples)
            .flat_map(f32::to_le_bytes)
            .collect();
        self.pending_pts = Some(pts + (samples / self.channels) as u64);
        trace!("audio frame at {pts}: {} bytes", data.len());
        self.ready.push_back(DecodedFrame {
            stream_index: self.stream_index,
            kind: MediaKind::Audio,
            pts,
            data,
        });
    }
}

impl FrameDecoder for PcmDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if packet.len() % self.block_align != 0 {
            return Err(Error::decode(
                self.stream_index,
                format!(
                    "packet of {} bytes is not a whole number of {}-byte sample frames",
                    packet.len(),
                    self.block_align
                ),
            ));
        }
        if self.pending_pts.is_none() {
            self.pending_pts = Some(packet.pts);
        }

        let mut ts = packet.pts;
        for chunk in packet.data.chunks(self.max_chunk_bytes) {
            let frames = (chunk.len() / self.block_align) as u64;
            let input = formats::Packet::new_from_slice(self.stream_index, ts, frames, chunk);
            match self.decoder.decode(&input) {
                Ok(decoded) => audio_buffer_to_f32(&decoded, &mut self.pending),
                Err(e) => {
                    return Err(Error::decode(
                        self.stream_index,
                        format!("Decode failed: {e}"),
                    ));
                }
            }
            ts += frames;
        }

        while self.pending.len() >= self.frame_samples {
            self.emit(self.frame_samples);
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Option<DecodedFrame> {
        self.ready.pop_front()
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.emit(self.pending.len());
        }
        self.decoder.reset();
        self.pending_pts = None;
    }
}

/// Append the samples of a decoded buffer to `output`, interleaved.
fn audio_buffer_to_f32(buffer: &AudioBufferRef<'_>, output: &mut Vec<f32>) {
    match buffer {
        AudioBufferRef::U8(buf) => interleave(buf, output),
        AudioBufferRef::U16(buf) => interleave(buf, output),
        AudioBufferRef::U24(buf) => interleave(buf, output),
        AudioBufferRef::U32(buf) => interleave(buf, output),
        AudioBufferRef::S8(buf) => interleave(buf, output),
        AudioBufferRef::S16(buf) => interleave(buf, output),
        AudioBufferRef::S24(buf) => interleave(buf, output),
        AudioBufferRef::S32(buf) => interleave(buf, output),
        AudioBufferRef::F32(buf) => interleave(buf, output),
        AudioBufferRef::F64(buf) => interleave(buf, output),
    }
}

fn interleave<S>(buffer: &AudioBuffer<S>, output: &mut Vec<f32>)
where
    S: Sample + IntoSample<f32>,
{
    let planes = buffer.planes();
    let channel_planes = planes.planes();
    let frames = buffer.frames();
    output.reserve(frames * channel_planes.len());

    for frame in 0..frames {
        for plane in channel_planes {
            output.push(plane[frame].into_sample());
        }
    }
}
