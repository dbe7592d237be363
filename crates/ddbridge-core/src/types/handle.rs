//! Capability handles with an explicit open/closed lifecycle.

use std::fmt;

/// One of the three handles a host can open against the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    Store,
    Demuxer,
    Decoder,
}

impl Handle {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Demuxer => "demuxer",
            Self::Decoder => "decoder",
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
