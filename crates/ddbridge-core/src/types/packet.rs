//! Compressed packets handed from the demuxer to the decoder.

use bytes::Bytes;

/// One compressed unit attributed to a single stream.
///
/// Packets never cross to the host; they sit in the engine's per-stream queue
/// until the matching `decode` call consumes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Index of the stream this packet belongs to.
    pub stream_index: u32,
    /// Sequence number of this packet within its stream.
    pub pts: u64,
    /// Payload bytes, copied out of the store.
    pub data: Bytes,
}

impl Packet {
    pub fn new(stream_index: u32, pts: u64, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            pts,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
