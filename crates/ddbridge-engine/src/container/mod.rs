//! Incremental container readers.
//!
//! A reader never owns the input. Each call receives the bytes buffered after
//! everything it has consumed so far and reports how far it got, so the same
//! reader works whether the whole file is already in the store or it arrives
//! one byte at a time.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

pub mod avi;
pub mod riff;
pub mod wav;
pub mod y4m;

use ddbridge_core::{EngineConfig, Error, Packet, Result, StreamInfo};

pub use avi::AviReader;
pub use wav::WavReader;
pub use y4m::Y4mReader;

/// Outcome of one incremental parse step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// An item was produced after consuming `consumed` bytes.
    Item { item: T, consumed: usize },
    /// Bytes were consumed without producing anything (padding, junk, indexes).
    Skip(usize),
    /// The buffered bytes end in the middle of a structure.
    NeedMore,
    /// Nothing more will be produced.
    End,
}

/// A container demuxer driven by whatever bytes are currently buffered.
pub trait ContainerReader {
    /// Short name used in logs.
    fn format_name(&self) -> &'static str;

    /// Advance through the headers. Yields the stream list once it is known.
    fn read_header(&mut self, buf: &[u8], eof: bool) -> Result<Step<Vec<StreamInfo>>>;

    /// Advance through the payload. Yields one packet at a time.
    fn next_packet(&mut self, buf: &[u8], eof: bool) -> Result<Step<Packet>>;
}

/// Container formats the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Wav,
    Avi,
    Y4m,
}

const Y4M_MAGIC: &[u8] = b"YUV4MPEG2 ";
const SIGNATURE_LEN: usize = 12;

impl ContainerKind {
    /// Identify the container from its leading bytes.
    ///
    /// Returns `Ok(None)` while the prefix is still ambiguous.
    pub fn detect(buf: &[u8], eof: bool) -> Result<Option<Self>> {
        if buf.starts_with(Y4M_MAGIC) {
            return Ok(Some(Self::Y4m));
        }
        if buf.len() >= SIGNATURE_LEN && &buf[0..4] == b"RIFF" {
            match &buf[8..12] {
                b"WAVE" => return Ok(Some(Self::Wav)),
                b"AVI " => return Ok(Some(Self::Avi)),
                other => {
                    return Err(Error::malformed(format!(
                        "unsupported RIFF form '{}'",
                        riff::fourcc_str(&riff::fourcc(other))
                    )))
                }
            }
        }

        let could_be_riff =
            buf.len() < SIGNATURE_LEN && b"RIFF".starts_with(&buf[..buf.len().min(4)]);
        let could_be_y4m = Y4M_MAGIC.starts_with(&buf[..buf.len().min(Y4M_MAGIC.len())]);
        if !could_be_riff && !could_be_y4m {
            return Err(Error::malformed("unrecognized container signature"));
        }
        if eof {
            return Err(if buf.is_empty() {
                Error::malformed("no input data")
            } else {
                Error::malformed(format!("input ends after {} bytes of signature", buf.len()))
            });
        }
        Ok(None)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Avi => "avi",
            Self::Y4m => "y4m",
        }
    }
}

/// Build the reader for a detected container.
pub fn reader_for(kind: ContainerKind, config: &EngineConfig) -> Box<dyn ContainerReader> {
    match kind {
        ContainerKind::Wav => Box::new(WavReader::new(config)),
        ContainerKind::Avi => Box::new(AviReader::new(config)),
        ContainerKind::Y4m => Box::new(Y4mReader::new(config)),
    }
}
