//! RIFF/AVI reader.
//!
//! Streams are enumerated from the `hdrl` list, which is buffered whole
//! before parsing. Packets are the `##dc` / `##db` / `##wb` chunks of the
//! `movi` list, including the ones grouped in `LIST rec` sub-lists. `JUNK`,
//! index chunks and anything after `movi` are skipped.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::{
    CodecParams, EngineConfig, Error, MediaKind, Packet, PixelFormat, Result, StreamInfo,
};
use tracing::{debug, trace, warn};

use super::riff::{self, ChunkHeader, Chunks, CHUNK_HEADER_LEN, LIST_HEADER_LEN};
use super::{ContainerReader, Step};

/// `BI_RGB` compression tag in a `BITMAPINFOHEADER`.
const BI_RGB: u32 = 0;

/// Largest `hdrl` list accepted.
const MAX_HDRL_SIZE: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Riff,
    Headers,
    Movi,
    Done,
}

/// Incremental AVI reader.
pub struct AviReader {
    max_packet_bytes: usize,
    phase: Phase,
    streams: Vec<StreamInfo>,
    /// Bytes per pts unit for audio streams; `None` for one-pts-per-chunk streams.
    pts_units: Vec<Option<u64>>,
    next_pts: Vec<u64>,
    skip_remaining: u64,
    /// Bytes left in `movi`; `None` when the writer left the size open.
    movi_remaining: Option<u64>,
}

impl AviReader {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_packet_bytes: config.max_packet_bytes,
            phase: Phase::Riff,
            streams: Vec::new(),
            pts_units: Vec::new(),
            next_pts: Vec::new(),
            skip_remaining: 0,
            movi_remaining: None,
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
        if self.phase == Phase::Movi {
            self.consume_movi(n);
        }
        Some(Step::Skip(n))
    }

    fn consume_movi(&mut self, n: usize) {
        if let Some(left) = self.movi_remaining.as_mut() {
            if (n as u64) > *left {
                warn!("chunk runs {} bytes past the end of movi", n as u64 - *left);
            }
            *left = left.saturating_sub(n as u64);
        }
    }

    fn parse_hdrl(&mut self, body: &[u8]) -> Result<()> {
        for chunk in Chunks::new(body) {
            let (header, data) = chunk?;
            match &header.id {
                b"avih" if data.len() >= 28 => {
                    debug!(
                        "avi main header: {} frames, {} streams",
                        riff::le_u32(&data[16..20]),
                        riff::le_u32(&data[24..28])
                    );
                }
                b"LIST" if data.len() >= 4 && &data[0..4] == b"strl" => {
                    let index = self.streams.len() as u32;
                    let (stream, pts_unit) = parse_strl(index, &data[4..])?;
                    debug!("avi stream {index}: {:?} {:?}", stream.kind, stream.codec);
                    self.streams.push(stream);
                    self.pts_units.push(pts_unit);
                    self.next_pts.push(0);
                }
                other => trace!("ignoring hdrl chunk '{}'", riff::fourcc_str(other)),
            }
        }
        Ok(())
    }

    fn read_movi_chunk(&mut self, buf: &[u8], eof: bool) -> Result<Step<Packet>> {
        let Some(header) = ChunkHeader::parse(buf) else {
            if eof && buf.is_empty() && self.movi_remaining.is_none() {
                self.phase = Phase::Done;
                return Ok(Step::End);
            }
            return Ok(Step::NeedMore);
        };

        if header.is_list() {
            if buf.len() < LIST_HEADER_LEN {
                return Ok(Step::NeedMore);
            }
            if &buf[8..12] == b"rec " {
                // Descend into the group; its chunks follow inline.
                self.consume_movi(LIST_HEADER_LEN);
                return Ok(Step::Skip(LIST_HEADER_LEN));
            }
            trace!("skipping movi list '{}'", riff::fourcc_str(&riff::fourcc(&buf[8..12])));
            return Ok(self.skip_chunk(&header));
        }

        if self.movi_remaining.is_none() && &header.id == b"idx1" {
            debug!("idx1 reached, movi complete");
            self.phase = Phase::Done;
            return Ok(Step::End);
        }

        let Some(index) = stream_number(&header.id).filter(|&i| (i as usize) < self.streams.len())
        else {
            trace!("skipping movi chunk '{}'", riff::fourcc_str(&header.id));
            return Ok(self.skip_chunk(&header));
        };

        let size = header.size as usize;
        if size > self.max_packet_bytes {
            return Err(Error::malformed(format!(
                "chunk '{}' declares {size} bytes, limit is {}",
                riff::fourcc_str(&header.id),
                self.max_packet_bytes
            )));
        }

        let slot = index as usize;
        if size == 0 {
            // A dropped frame still advances the stream clock.
            if self.pts_units[slot].is_none() {
                self.next_pts[slot] += 1;
            }
            self.consume_movi(CHUNK_HEADER_LEN);
            return Ok(Step::Skip(CHUNK_HEADER_LEN));
        }

        let padded = CHUNK_HEADER_LEN + header.padded_size() as usize;
        let consumed = if buf.len() >= padded {
            padded
        } else if eof && buf.len() >= CHUNK_HEADER_LEN + size {
            CHUNK_HEADER_LEN + size
        } else {
            return Ok(Step::NeedMore);
        };

        let pts = self.next_pts[slot];
        self.next_pts[slot] += match self.pts_units[slot] {
            Some(unit) => size as u64 / unit,
            None => 1,
        };
        self.consume_movi(consumed);
        let packet = Packet::new(
            index,
            pts,
            buf[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + size].to_vec(),
        );
        trace!("avi packet: stream {index}, pts {pts}, {size} bytes");
        Ok(Step::Item {
            item: packet,
            consumed,
        })
    }

    fn skip_chunk<T>(&mut self, header: &ChunkHeader) -> Step<T> {
        self.skip_remaining = header.padded_size();
        if self.phase == Phase::Movi {
            self.consume_movi(CHUNK_HEADER_LEN);
        }
        Step::Skip(CHUNK_HEADER_LEN)
    }
}

impl ContainerReader for AviReader {
    fn format_name(&self) -> &'static str {
        "avi"
    }

    fn read_header(&mut self, buf: &[u8], _eof: bool) -> Result<Step<Vec<StreamInfo>>> {
        if self.phase == Phase::Riff {
            if buf.len() < LIST_HEADER_LEN {
                return Ok(Step::NeedMore);
            }
            if &buf[0..4] != b"RIFF" || &buf[8..12] != b"AVI " {
                return Err(Error::malformed("missing RIFF/AVI header"));
            }
            self.phase = Phase::Headers;
            return Ok(Step::Skip(LIST_HEADER_LEN));
        }

        if let Some(step) = self.skip_pending(buf) {
            return Ok(step);
        }

        let Some(header) = ChunkHeader::parse(buf) else {
            return Ok(Step::NeedMore);
        };

        if !header.is_list() {
            trace!("skipping avi chunk '{}'", riff::fourcc_str(&header.id));
            return Ok(self.skip_chunk(&header));
        }
        if buf.len() < LIST_HEADER_LEN {
            return Ok(Step::NeedMore);
        }

        match &buf[8..12] {
            b"hdrl" => {
                if header.size > MAX_HDRL_SIZE {
                    return Err(Error::malformed(format!(
                        "hdrl list of {} bytes",
                        header.size
                    )));
                }
                let total = CHUNK_HEADER_LEN + header.padded_size() as usize;
                let end = CHUNK_HEADER_LEN + header.size as usize;
                if buf.len() < total {
                    return Ok(Step::NeedMore);
                }
                if header.size < 4 {
                    return Err(Error::malformed("hdrl list is empty"));
                }
                self.parse_hdrl(&buf[LIST_HEADER_LEN..end])?;
                Ok(Step::Skip(total))
            }
            b"movi" => {
                if self.streams.is_empty() {
                    return Err(Error::malformed("movi list before any stream header"));
                }
                self.movi_remaining = match header.size {
                    0..=4 | u32::MAX => None,
                    size => Some(u64::from(size) - 4),
                };
                self.phase = Phase::Movi;
                debug!(
                    "avi movi list: {} streams, {}",
                    self.streams.len(),
                    self.movi_remaining
                        .map_or_else(|| "open-ended".to_string(), |n| format!("{n} bytes"))
                );
                Ok(Step::Item {
                    item: self.streams.clone(),
                    consumed: LIST_HEADER_LEN,
                })
            }
            other => {
                trace!("skipping avi list '{}'", riff::fourcc_str(&riff::fourcc(other)));
                Ok(self.skip_chunk(&header))
            }
        }
    }

    fn next_packet(&mut self, buf: &[u8], eof: bool) -> Result<Step<Packet>> {
        if self.phase == Phase::Done || self.movi_remaining == Some(0) {
            self.phase = Phase::Done;
            return Ok(Step::End);
        }
        if let Some(step) = self.skip_pending(buf) {
            return Ok(step);
        }
        self.read_movi_chunk(buf, eof)
    }
}

/// Stream number encoded in the first two characters of a movi chunk id.
fn stream_number(id: &riff::FourCc) -> Option<u32> {
    let tens = char::from(id[0]).to_digit(10)?;
    let ones = char::from(id[1]).to_digit(10)?;
    Some(tens * 10 + ones)
}

/// Parse one `strl` list body into a stream description.
fn parse_strl(index: u32, body: &[u8]) -> Result<(StreamInfo, Option<u64>)> {
    let mut stream_type = None;
    let mut format = None;
    for chunk in Chunks::new(body) {
        let (header, data) = chunk?;
        match &header.id {
            b"strh" if data.len() >= 8 => stream_type = Some(riff::fourcc(&data[0..4])),
            b"strf" => format = Some(data),
            _ => {}
        }
    }

    let Some(stream_type) = stream_type else {
        return Err(Error::malformed(format!("stream {index} has no strh chunk")));
    };

    let stream = match (&stream_type, format) {
        (b"vids", Some(strf)) => {
            StreamInfo::new(index, MediaKind::Video, parse_bitmap_info(strf)?)
        }
        (b"auds", Some(strf)) => {
            let codec = riff::parse_wave_format(strf)?;
            let unit = strf.get(12..14).map(riff::le_u16).filter(|&a| a > 0);
            return Ok((
                StreamInfo::new(index, MediaKind::Audio, codec),
                Some(u64::from(unit.unwrap_or(1))),
            ));
        }
        (b"vids" | b"auds", None) => {
            return Err(Error::malformed(format!("stream {index} has no strf chunk")));
        }
        (other, _) => StreamInfo::new(
            index,
            MediaKind::Other,
            CodecParams::Unsupported {
                tag: riff::fourcc_str(other),
            },
        ),
    };
    Ok((stream, None))
}

/// Parse a `BITMAPINFOHEADER`.
fn parse_bitmap_info(strf: &[u8]) -> Result<CodecParams> {
    if strf.len() < 20 {
        return Err(Error::malformed(format!(
            "bitmap info is {} bytes, need at least 20",
            strf.len()
        )));
    }
    let width = riff::le_i32(&strf[4..8]);
    let height = riff::le_i32(&strf[8..12]);
    let bit_count = riff::le_u16(&strf[14..16]);
    let compression = riff::fourcc(&strf[16..20]);

    if width <= 0 || height == 0 {
        return Err(Error::malformed(format!(
            "invalid frame dimensions {width}x{height}"
        )));
    }
    let (width, bottom_up) = (width.unsigned_abs(), height > 0);
    let height = height.unsigned_abs();

    let pixel_format = match (u32::from_le_bytes(compression), bit_count) {
        (BI_RGB, 24) => Some(PixelFormat::Bgr24),
        (BI_RGB, 32) => Some(PixelFormat::Bgra32),
        _ => match &compression {
            b"I420" | b"IYUV" => Some(PixelFormat::Yuv420p),
            b"Y42B" => Some(PixelFormat::Yuv422p),
            b"Y800" | b"GREY" => Some(PixelFormat::Gray8),
            _ => None,
        },
    };

    if pixel_format.is_some_and(|format| format.frame_size(width, height).is_none()) {
        return Err(Error::malformed(format!(
            "{width}x{height} frames do not fit in memory"
        )));
    }

    Ok(match pixel_format {
        Some(pixel_format) => CodecParams::RawVideo {
            width,
            height,
            pixel_format,
            bottom_up: bottom_up && !pixel_format.is_planar(),
        },
        None if u32::from_le_bytes(compression) == BI_RGB => CodecParams::Unsupported {
            tag: format!("rgb{bit_count}"),
        },
        None => CodecParams::Unsupported {
            tag: riff::fourcc_str(&compression),
        },
    })
}
