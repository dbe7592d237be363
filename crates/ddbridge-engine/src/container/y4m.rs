//! YUV4MPEG2 reader.
//!
//! One stream header line (`YUV4MPEG2 W.. H.. C..`), then a `FRAME` line
//! followed by exactly one raw frame per packet.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::{
    CodecParams, EngineConfig, Error, MediaKind, Packet, PixelFormat, Result, StreamInfo,
};
use tracing::{debug, trace};

use super::{ContainerReader, Step};

/// Longest header or frame line accepted before giving up on finding `\n`.
const MAX_LINE: usize = 4096;

const FRAME_TAG: &[u8] = b"FRAME";

/// Incremental Y4M reader.
pub struct Y4mReader {
    max_packet_bytes: usize,
    frame_size: usize,
    pts: u64,
}

impl Y4mReader {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_packet_bytes: config.max_packet_bytes,
            frame_size: 0,
            pts: 0,
        }
    }
}

/// Length of the line at the front of `buf` including its `\n`.
fn line_len(buf: &[u8]) -> Result<Option<usize>> {
    match buf.iter().take(MAX_LINE).position(|&b| b == b'\n') {
        Some(pos) => Ok(Some(pos + 1)),
        None if buf.len() >= MAX_LINE => Err(Error::malformed(format!(
            "no line break within {MAX_LINE} bytes"
        ))),
        None => Ok(None),
    }
}

fn parse_colorspace(tag: &str) -> Option<PixelFormat> {
    match tag {
        "420" | "420jpeg" | "420paldv" | "420mpeg2" => Some(PixelFormat::Yuv420p),
        "422" => Some(PixelFormat::Yuv422p),
        "444" => Some(PixelFormat::Yuv444p),
        "mono" => Some(PixelFormat::Gray8),
        _ => None,
    }
}

/// Parse the parameters after the `YUV4MPEG2` signature.
fn parse_header(line: &str) -> Result<(u32, u32, PixelFormat)> {
    let mut width = None;
    let mut height = None;
    let mut pixel_format = PixelFormat::Yuv420p;

    for token in line.split_ascii_whitespace().skip(1) {
        let mut chars = token.chars();
        let key = chars.next();
        let value = chars.as_str();
        match key {
            Some('W') => width = value.parse::<u32>().ok(),
            Some('H') => height = value.parse::<u32>().ok(),
            Some('C') => {
                pixel_format = parse_colorspace(value).ok_or_else(|| {
                    Error::malformed(format!("unsupported y4m colorspace '{value}'"))
                })?;
            }
            // Frame rate, interlacing, aspect ratio and extensions don't affect layout.
            _ => trace!("y4m header token '{token}'"),
        }
    }

    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h, pixel_format)),
        _ => Err(Error::malformed("y4m header lacks valid W and H")),
    }
}

impl ContainerReader for Y4mReader {
    fn format_name(&self) -> &'static str {
        "y4m"
    }

    fn read_header(&mut self, buf: &[u8], _eof: bool) -> Result<Step<Vec<StreamInfo>>> {
        let Some(len) = line_len(buf)? else {
            return Ok(Step::NeedMore);
        };
        let line = std::str::from_utf8(&buf[..len - 1])
            .map_err(|_| Error::malformed("y4m header is not ASCII"))?;
        if !line.starts_with("YUV4MPEG2") {
            return Err(Error::malformed("missing YUV4MPEG2 signature"));
        }

        let (width, height, pixel_format) = parse_header(line)?;
        self.frame_size = pixel_format
            .frame_size(width, height)
            .filter(|&size| size <= self.max_packet_bytes)
            .ok_or_else(|| {
                Error::malformed(format!("{width}x{height} frames exceed the packet limit"))
            })?;
        debug!(
            "y4m stream: {width}x{height} {pixel_format:?}, {} bytes per frame",
            self.frame_size
        );

        let stream = StreamInfo::new(
            0,
            MediaKind::Video,
            CodecParams::RawVideo {
                width,
                height,
                pixel_format,
                bottom_up: false,
            },
        );
        Ok(Step::Item {
            item: vec![stream],
            consumed: len,
        })
    }

    fn next_packet(&mut self, buf: &[u8], eof: bool) -> Result<Step<Packet>> {
        if buf.is_empty() {
            return Ok(if eof { Step::End } else { Step::NeedMore });
        }
        let Some(len) = line_len(buf)? else {
            return Ok(Step::NeedMore);
        };
        if !buf.starts_with(FRAME_TAG) {
            return Err(Error::malformed(format!(
                "expected FRAME marker at frame {}",
                self.pts
            )));
        }
        let total = len + self.frame_size;
        if buf.len() < total {
            return Ok(Step::NeedMore);
        }

        let packet = Packet::new(0, self.pts, buf[len..total].to_vec());
        self.pts += 1;
        Ok(Step::Item {
            item: packet,
            consumed: total,
        })
    }
}
