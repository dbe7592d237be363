//! Integer status codes reported across the host/engine boundary.
//!
//! `0` is success for every operation. `decode` additionally distinguishes
//! [`FRAME_EMITTED`] (also `0`) from [`NO_FRAME`]. Failures are negative.

use crate::error::Result;

pub const OK: i32 = 0;
pub const FRAME_EMITTED: i32 = 0;
pub const NO_FRAME: i32 = 1;

pub const PROTOCOL_VIOLATION: i32 = -1;
pub const CAPACITY_ERROR: i32 = -2;
pub const MALFORMED_INPUT: i32 = -3;
pub const DECODE_ERROR: i32 = -4;
pub const NOT_OPEN: i32 = -5;
pub const ALREADY_OPEN: i32 = -6;
pub const STREAMS_NOT_SELECTED: i32 = -7;
pub const SOURCE_CLOSED: i32 = -8;
pub const IO_ERROR: i32 = -9;
pub const CONFIG_ERROR: i32 = -10;

/// Stream index delivered to `on_packet_parsed` when the demuxer fails while
/// resuming outside of `open_demuxer`.
pub const ERROR_STREAM_INDEX: u32 = u32::MAX;

/// Outcome of a successful `decode` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// At least one frame callback fired.
    FrameEmitted,
    /// The packet was accepted but the codec is still buffering.
    NoFrame,
}

impl DecodeStatus {
    pub const fn code(self) -> i32 {
        match self {
            Self::FrameEmitted => FRAME_EMITTED,
            Self::NoFrame => NO_FRAME,
        }
    }
}

/// Collapse an operation result into its boundary status code.
pub fn code_of<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => OK,
        Err(e) => e.status_code(),
    }
}

/// Collapse a decode result into `FRAME_EMITTED`, `NO_FRAME`, or a failure code.
pub fn decode_code(result: &Result<DecodeStatus>) -> i32 {
    match result {
        Ok(status) => status.code(),
        Err(e) => e.status_code(),
    }
}
