//! RIFF/WAVE reader.
//!
//! The data chunk carries no packet structure, so the reader cuts it into
//! packets of `pcm_frames_per_packet` sample frames. A data size of `0` or
//! `0xFFFF_FFFF` (written by streaming encoders) means "until end of input".

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::{CodecParams, EngineConfig, Error, MediaKind, Packet, Result, StreamInfo};
use tracing::{debug, trace, warn};

use super::riff::{self, ChunkHeader, CHUNK_HEADER_LEN, LIST_HEADER_LEN};
use super::{ContainerReader, Step};

/// Largest `fmt ` chunk accepted.
const MAX_FMT_SIZE: u32 = 1024;

/// Incremental WAV reader.
pub struct WavReader {
    frames_per_packet: usize,
    riff_checked: bool,
    codec: Option<CodecParams>,
    /// Bytes of an uninteresting chunk still to be skipped.
    skip_remaining: u64,
    /// Bytes left in the data chunk; `None` when the size is open-ended.
    data_remaining: Option<u64>,
    block_align: usize,
    pts: u64,
}

impl WavReader {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            frames_per_packet: config.pcm_frames_per_packet,
            riff_checked: false,
            codec: None,
            skip_remaining: 0,
            data_remaining: None,
            block_align: 1,
            pts: 0,
        }
    }

    fn skip_pending<T>(&mut self, buf: &[u8]) -> Option<Step<T>> {
        if self.skip_remaining == 0 {
            return None;
        }
        let n = (self.skip_remaining as usize).min(buf.len());
        if n == 0 {
            return Some(Step::NeedMore);
        }
        self.skip_remaining -= n as u64;
        Some(Step::Skip(n))
    }

    fn stream(&self) -> Option<StreamInfo> {
        self.codec
            .clone()
            .map(|codec| StreamInfo::new(0, MediaKind::Audio, codec))
    }
}

impl ContainerReader for WavReader {
    fn format_name(&self) -> &'static str {
        "wav"
    }

    fn read_header(&mut self, buf: &[u8], _eof: bool) -> Result<Step<Vec<StreamInfo>>> {
        if !self.riff_checked {
            if buf.len() < LIST_HEADER_LEN {
                return Ok(Step::NeedMore);
            }
            if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
                return Err(Error::malformed("missing RIFF/WAVE header"));
            }
            self.riff_checked = true;
            return Ok(Step::Skip(LIST_HEADER_LEN));
        }

        if let Some(step) = self.skip_pending(buf) {
            return Ok(step);
        }

        let Some(header) = ChunkHeader::parse(buf) else {
            return Ok(Step::NeedMore);
        };

        match &header.id {
            b"fmt " => {
                if header.size > MAX_FMT_SIZE {
                    return Err(Error::malformed(format!(
                        "fmt chunk of {} bytes",
                        header.size
                    )));
                }
                let total = CHUNK_HEADER_LEN + header.padded_size() as usize;
                if buf.len() < total {
                    return Ok(Step::NeedMore);
                }
                let body = &buf[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + header.size as usize];
                let codec = riff::parse_wave_format(body)?;
                if let CodecParams::Pcm { block_align, .. } = codec {
                    self.block_align = usize::from(block_align);
                } else {
                    // Unsupported codecs still get packetized by their block alignment.
                    self.block_align = usize::from(riff::le_u16(&body[12..14]).max(1));
                }
                debug!("wav format: {codec:?}");
                self.codec = Some(codec);
                Ok(Step::Skip(total))
            }
            b"data" => {
                let Some(stream) = self.stream() else {
                    return Err(Error::malformed("data chunk before fmt chunk"));
                };
                self.data_remaining = match header.size {
                    0 | u32::MAX => None,
                    size => Some(u64::from(size)),
                };
                debug!(
                    "wav data chunk: {}",
                    self.data_remaining
                        .map_or_else(|| "open-ended".to_string(), |n| format!("{n} bytes"))
                );
                Ok(Step::Item {
                    item: vec![stream],
                    consumed: CHUNK_HEADER_LEN,
                })
            }
            other => {
                trace!("skipping wav chunk '{}'", riff::fourcc_str(other));
                self.skip_remaining = header.padded_size();
                Ok(Step::Skip(CHUNK_HEADER_LEN))
            }
        }
    }

    fn next_packet(&mut self, buf: &[u8], eof: bool) -> Result<Step<Packet>> {
        if self.data_remaining == Some(0) {
            return Ok(Step::End);
        }

        let packet_bytes = self.frames_per_packet * self.block_align;
        let wanted = self
            .data_remaining
            .map_or(packet_bytes, |left| packet_bytes.min(left as usize));
        let whole = wanted - wanted % self.block_align;

        if whole == 0 {
            // Less than one sample frame left in the chunk.
            let n = wanted.min(buf.len());
            if n == 0 {
                return Ok(if eof { Step::End } else { Step::NeedMore });
            }
            warn!("dropping {n} trailing bytes of a partial sample frame");
            self.data_remaining = self.data_remaining.map(|left| left - n as u64);
            return Ok(Step::Skip(n));
        }

        let take = if buf.len() >= whole {
            whole
        } else if eof {
            let usable = buf.len() - buf.len() % self.block_align;
            if usable == 0 {
                if !buf.is_empty() {
                    warn!("input ends inside a sample frame ({} bytes)", buf.len());
                }
                return Ok(Step::End);
            }
            usable
        } else {
            return Ok(Step::NeedMore);
        };

        let packet = Packet::new(0, self.pts, buf[..take].to_vec());
        self.pts += (take / self.block_align) as u64;
        self.data_remaining = self.data_remaining.map(|left| left - take as u64);
        Ok(Step::Item {
            item: packet,
            consumed: take,
        })
    }
}
