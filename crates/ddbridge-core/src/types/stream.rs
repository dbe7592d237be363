//! Elementary stream and codec parameter types.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use serde::{Deserialize, Serialize};

/// Media kind of an elementary stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    /// Text, MIDI, or anything else the engine announces but ignores.
    Other,
}

/// Sample encoding of an uncompressed audio stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PcmFormat {
    U8,
    S16Le,
    S24Le,
    S32Le,
    F32Le,
    F64Le,
    ALaw,
    MuLaw,
}

impl PcmFormat {
    /// `WAVE_FORMAT_PCM`.
    pub const WAVE_FORMAT_PCM: u16 = 0x0001;
    /// `WAVE_FORMAT_IEEE_FLOAT`.
    pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
    /// `WAVE_FORMAT_ALAW`.
    pub const WAVE_FORMAT_ALAW: u16 = 0x0006;
    /// `WAVE_FORMAT_MULAW`.
    pub const WAVE_FORMAT_MULAW: u16 = 0x0007;

    /// Map a `WAVEFORMATEX` format tag and bit depth onto a sample format.
    pub const fn from_wave_format(tag: u16, bits_per_sample: u16) -> Option<Self> {
        match (tag, bits_per_sample) {
            (Self::WAVE_FORMAT_PCM, 8) => Some(Self::U8),
            (Self::WAVE_FORMAT_PCM, 16) => Some(Self::S16Le),
            (Self::WAVE_FORMAT_PCM, 24) => Some(Self::S24Le),
            (Self::WAVE_FORMAT_PCM, 32) => Some(Self::S32Le),
            (Self::WAVE_FORMAT_IEEE_FLOAT, 32) => Some(Self::F32Le),
            (Self::WAVE_FORMAT_IEEE_FLOAT, 64) => Some(Self::F64Le),
            (Self::WAVE_FORMAT_ALAW, 8) => Some(Self::ALaw),
            (Self::WAVE_FORMAT_MULAW, 8) => Some(Self::MuLaw),
            _ => None,
        }
    }

    /// Bits per coded sample.
    pub const fn bits_per_sample(self) -> u16 {
        match self {
            Self::U8 | Self::ALaw | Self::MuLaw => 8,
            Self::S16Le => 16,
            Self::S24Le => 24,
            Self::S32Le | Self::F32Le => 32,
            Self::F64Le => 64,
        }
    }
}

/// Layout of an uncompressed video frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Gray8,
    /// Packed BGR, rows padded to 4 bytes (`BI_RGB`, 24 bit).
    Bgr24,
    /// Packed BGRA (`BI_RGB`, 32 bit).
    Bgra32,
}

impl PixelFormat {
    /// Size in bytes of one frame of this format, `None` if it does not fit
    /// in `usize`.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        let luma = w.checked_mul(h)?;
        let chroma = |rows: usize| w.div_ceil(2).checked_mul(rows)?.checked_mul(2);
        match self {
            Self::Yuv420p => luma.checked_add(chroma(h.div_ceil(2))?),
            Self::Yuv422p => luma.checked_add(chroma(h)?),
            Self::Yuv444p => luma.checked_mul(3),
            Self::Gray8 => Some(luma),
            Self::Bgr24 | Self::Bgra32 => self.row_stride(width)?.checked_mul(h),
        }
    }

    /// Bytes per row for packed formats; luma row width for planar ones.
    pub fn row_stride(self, width: u32) -> Option<usize> {
        let w = width as usize;
        match self {
            Self::Bgr24 => Some(w.checked_mul(3)?.checked_add(3)? & !3),
            Self::Bgra32 => w.checked_mul(4),
            Self::Yuv420p | Self::Yuv422p | Self::Yuv444p | Self::Gray8 => Some(w),
        }
    }

    /// Whether the format stores each component in its own plane.
    pub const fn is_planar(self) -> bool {
        matches!(
            self,
            Self::Yuv420p | Self::Yuv422p | Self::Yuv444p | Self::Gray8
        )
    }
}

/// Codec parameters discovered for a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum CodecParams {
    Pcm {
        format: PcmFormat,
        sample_rate: u32,
        channels: u16,
        /// Bytes per interleaved sample frame.
        block_align: u16,
    },
    RawVideo {
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        /// Rows are stored bottom row first.
        bottom_up: bool,
    },
    /// A codec the engine can demux but not decode.
    Unsupported { tag: String },
}

/// One elementary stream discovered inside the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamInfo {
    /// Index as used by `on_packet_parsed` and `decode`.
    pub index: u32,
    /// Media kind.
    pub kind: MediaKind,
    /// Codec parameters.
    #[serde(flatten)]
    pub codec: CodecParams,
}

impl StreamInfo {
    pub const fn new(index: u32, kind: MediaKind, codec: CodecParams) -> Self {
        Self { index, kind, codec }
    }

    /// Whether the engine has a decoder for this stream.
    pub const fn is_decodable(&self) -> bool {
        !matches!(self.codec, CodecParams::Unsupported { .. })
            && !matches!(self.kind, MediaKind::Other)
    }
}
