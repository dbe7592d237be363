//! Error types for ddbridge.

use thiserror::Error;

use crate::status;
use crate::types::Handle;

/// Result type alias using ddbridge's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ddbridge.
///
/// Every variant maps onto a small integer status code (see [`status`]) so the
/// host side of the boundary never has to inspect anything richer than an `i32`.
#[derive(Error, Debug)]
pub enum Error {
    // Lifecycle errors
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("{0} is not open")]
    NotOpen(Handle),

    #[error("{0} is already open")]
    AlreadyOpen(Handle),

    #[error("Streams have not been selected yet")]
    StreamsNotSelected,

    #[error("Input store was closed")]
    SourceClosed,

    // Arena errors
    #[error("Arena capacity exceeded: requested {requested} bytes, limit is {limit} bytes")]
    Capacity { requested: usize, limit: usize },

    // Media errors
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Decode error on stream {stream_index}: {message}")]
    Decode { stream_index: u32, message: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Create a protocol violation error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create a malformed input error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    /// Create a decode error for one packet of a stream.
    pub fn decode(stream_index: u32, msg: impl Into<String>) -> Self {
        Self::Decode {
            stream_index,
            message: msg.into(),
        }
    }

    /// Returns true if the caller can carry on after this error.
    ///
    /// Capacity errors can be retried with a smaller request, and a decode
    /// error only costs the one packet.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Capacity { .. } | Self::Decode { .. })
    }

    /// The status code reported across the boundary for this error.
    pub const fn status_code(&self) -> i32 {
        match self {
            Self::ProtocolViolation(_) => status::PROTOCOL_VIOLATION,
            Self::Capacity { .. } => status::CAPACITY_ERROR,
            Self::MalformedInput(_) => status::MALFORMED_INPUT,
            Self::Decode { .. } => status::DECODE_ERROR,
            Self::NotOpen(_) => status::NOT_OPEN,
            Self::AlreadyOpen(_) => status::ALREADY_OPEN,
            Self::StreamsNotSelected => status::STREAMS_NOT_SELECTED,
            Self::SourceClosed => status::SOURCE_CLOSED,
            Self::Io(_) => status::IO_ERROR,
            Self::Config(_) | Self::ConfigParse(_) => status::CONFIG_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverable() {
        assert!(Error::Capacity {
            requested: 10,
            limit: 5
        }
        .is_recoverable());
        assert!(Error::decode(1, "bad packet").is_recoverable());
        assert!(!Error::SourceClosed.is_recoverable());
        assert!(!Error::malformed("truncated").is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::NotOpen(Handle::Decoder);
        assert_eq!(err.to_string(), "decoder is not open");

        let err = Error::decode(3, "short frame");
        assert_eq!(err.to_string(), "Decode error on stream 3: short frame");
    }

    #[test]
    fn test_status_codes_are_negative() {
        let errors = [
            Error::protocol("x"),
            Error::Capacity {
                requested: 1,
                limit: 0,
            },
            Error::malformed("x"),
            Error::decode(0, "x"),
            Error::NotOpen(Handle::Store),
            Error::AlreadyOpen(Handle::Demuxer),
            Error::StreamsNotSelected,
            Error::SourceClosed,
            Error::Config("x".into()),
        ];
        for err in errors {
            assert!(err.status_code() < 0, "{err} should map to a failure code");
        }
        assert_eq!(Error::decode(0, "x").status_code(), status::DECODE_ERROR);
    }
}
