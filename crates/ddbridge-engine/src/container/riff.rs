//! RIFF chunk primitives shared by the WAV and AVI readers.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::{CodecParams, Error, PcmFormat, Result};

/// Size of a chunk header (`fourcc` + little-endian size).
pub const CHUNK_HEADER_LEN: usize = 8;
/// Size of a list header (`LIST` + size + list type).
pub const LIST_HEADER_LEN: usize = 12;

/// `WAVE_FORMAT_EXTENSIBLE`.
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// A four-character code.
pub type FourCc = [u8; 4];

/// Header of one RIFF chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: FourCc,
    pub size: u32,
}

impl ChunkHeader {
    /// Read a chunk header from the front of `buf`, if enough bytes are there.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < CHUNK_HEADER_LEN {
            return None;
        }
        Some(Self {
            id: fourcc(&buf[0..4]),
            size: le_u32(&buf[4..8]),
        })
    }

    /// Payload size rounded up to the RIFF word boundary.
    pub const fn padded_size(&self) -> u64 {
        padded(self.size as u64)
    }

    /// Whether this header opens a `LIST` (or `RIFF`) container.
    pub fn is_list(&self) -> bool {
        &self.id == b"LIST" || &self.id == b"RIFF"
    }
}

/// Round a chunk size up to an even number of bytes.
pub const fn padded(size: u64) -> u64 {
    size + (size & 1)
}

pub fn fourcc(bytes: &[u8]) -> FourCc {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// Printable form of a fourcc for logs and stream tags.
pub fn fourcc_str(code: &FourCc) -> String {
    code.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect::<String>()
        .trim_end()
        .to_string()
}

pub fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

pub fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Iterate over the chunks of a fully buffered chunk body.
pub struct Chunks<'a> {
    body: &'a [u8],
}

impl<'a> Chunks<'a> {
    pub const fn new(body: &'a [u8]) -> Self {
        Self { body }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Result<(ChunkHeader, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.body.len() < CHUNK_HEADER_LEN {
            return None;
        }
        let header = ChunkHeader::parse(self.body)?;
        let end = CHUNK_HEADER_LEN + header.size as usize;
        if end > self.body.len() {
            self.body = &[];
            return Some(Err(Error::malformed(format!(
                "chunk '{}' overruns its parent ({} > {} bytes)",
                fourcc_str(&header.id),
                end,
                self.body.len()
            ))));
        }
        let data = &self.body[CHUNK_HEADER_LEN..end];
        let next = (CHUNK_HEADER_LEN as u64 + header.padded_size()).min(self.body.len() as u64);
        self.body = &self.body[next as usize..];
        Some(Ok((header, data)))
    }
}

/// Parse a `WAVEFORMATEX` (or `WAVEFORMATEXTENSIBLE`) structure.
///
/// Formats without a PCM mapping come back as [`CodecParams::Unsupported`]
/// so the stream can still be announced.
pub fn parse_wave_format(body: &[u8]) -> Result<CodecParams> {
    if body.len() < 16 {
        return Err(Error::malformed(format!(
            "wave format is {} bytes, need at least 16",
            body.len()
        )));
    }
    let mut tag = le_u16(&body[0..2]);
    let channels = le_u16(&body[2..4]);
    let sample_rate = le_u32(&body[4..8]);
    let block_align = le_u16(&body[12..14]);
    let bits_per_sample = le_u16(&body[14..16]);

    if tag == WAVE_FORMAT_EXTENSIBLE && body.len() >= 26 {
        // First two bytes of the sub-format GUID carry the real format tag.
        tag = le_u16(&body[24..26]);
    }

    if channels == 0 || sample_rate == 0 {
        return Err(Error::malformed(format!(
            "wave format declares {channels} channels at {sample_rate} Hz"
        )));
    }

    let Some(format) = PcmFormat::from_wave_format(tag, bits_per_sample) else {
        return Ok(CodecParams::Unsupported {
            tag: format!("wave:0x{tag:04x}"),
        });
    };

    let expected_align = u32::from(channels) * u32::from(format.bits_per_sample()) / 8;
    if u32::from(block_align) != expected_align {
        return Err(Error::malformed(format!(
            "block align {block_align} does not match {channels} x {bits_per_sample}-bit samples"
        )));
    }

    Ok(CodecParams::Pcm {
        format,
        sample_rate,
        channels,
        block_align,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave_format(tag: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let align = channels * bits / 8;
        let mut body = Vec::new();
        body.extend_from_slice(&tag.to_le_bytes());
        body.extend_from_slice(&channels.to_le_bytes());
        body.extend_from_slice(&rate.to_le_bytes());
        body.extend_from_slice(&(rate * u32::from(align)).to_le_bytes());
        body.extend_from_slice(&align.to_le_bytes());
        body.extend_from_slice(&bits.to_le_bytes());
        body
    }

    #[test]
    fn test_chunk_header() {
        let header = ChunkHeader::parse(b"data\x05\x00\x00\x00").unwrap();
        assert_eq!(&header.id, b"data");
        assert_eq!(header.size, 5);
        assert_eq!(header.padded_size(), 6);
        assert!(ChunkHeader::parse(b"data").is_none());
    }

    #[test]
    fn test_chunks_iteration_with_padding() {
        let mut body = Vec::new();
        body.extend_from_slice(b"abcd\x03\x00\x00\x00xyz\x00");
        body.extend_from_slice(b"efgh\x02\x00\x00\x00pq");
        let chunks: Vec<_> = Chunks::new(&body).map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].1, b"xyz");
        assert_eq!(&chunks[1].0.id, b"efgh");
    }

    #[test]
    fn test_chunks_overrun() {
        let body = b"abcd\x10\x00\x00\x00short";
        let result: Vec<_> = Chunks::new(body).collect();
        assert!(matches!(result[0], Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_parse_pcm_format() {
        let params = parse_wave_format(&wave_format(1, 2, 44100, 16)).unwrap();
        assert_eq!(
            params,
            CodecParams::Pcm {
                format: PcmFormat::S16Le,
                sample_rate: 44100,
                channels: 2,
                block_align: 4,
            }
        );
    }

    #[test]
    fn test_parse_unknown_format_is_unsupported() {
        let params = parse_wave_format(&wave_format(0x11, 1, 8000, 4)).unwrap();
        assert!(matches!(params, CodecParams::Unsupported { .. }));
    }

    #[test]
    fn test_parse_bad_block_align() {
        let mut body = wave_format(1, 2, 44100, 16);
        body[12] = 3;
        assert!(parse_wave_format(&body).is_err());
    }

    #[test]
    fn test_parse_huge_channel_count_is_malformed() {
        let mut body = wave_format(1, 1, 8000, 32);
        body[2..4].copy_from_slice(&4096u16.to_le_bytes());
        let err = parse_wave_format(&body).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_fourcc_str() {
        assert_eq!(fourcc_str(b"00dc"), "00dc");
        assert_eq!(fourcc_str(b"rec "), "rec");
        assert_eq!(fourcc_str(&[0, b'a', b'b', b'c']), "?abc");
    }
}
