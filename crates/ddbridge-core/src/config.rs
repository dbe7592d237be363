//! Bridge configuration, loaded from TOML.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Allocation granularity of the arena.
pub const MEMORY_PAGE: usize = 64 * 1024;

/// Top-level configuration for a bridge session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capacity reserved for the store region when the store opens.
    pub initial_store_capacity: usize,
    /// Hard limit on the arena; growth beyond it is a capacity error.
    pub max_arena_bytes: usize,
    /// Chunk size the engine asks for when it decides how much to read next.
    pub pull_chunk_size: usize,
    /// Unconsumed backlog at which the engine stops asking for more input.
    pub max_buffered_bytes: usize,
    /// Settings handed to the demux/decode engine.
    pub engine: EngineConfig,
}

/// Settings for the container readers and frame decoders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample frames per packet when a container has no packet structure (WAV).
    pub pcm_frames_per_packet: usize,
    /// Samples per channel in each emitted audio frame.
    pub audio_frame_samples: usize,
    /// Chunks declaring more than this many bytes are treated as malformed.
    pub max_packet_bytes: usize,
    /// Flip bottom-up RGB frames so row 0 is the top row.
    pub flip_bottom_up: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            initial_store_capacity: MEMORY_PAGE * 10,
            max_arena_bytes: 256 * 1024 * 1024,
            pull_chunk_size: MEMORY_PAGE * 3,
            max_buffered_bytes: 8 * 1024 * 1024,
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pcm_frames_per_packet: 1024,
            audio_frame_samples: 1024,
            max_packet_bytes: 64 * 1024 * 1024,
            flip_bottom_up: true,
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Load the file at `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("Config file not found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Platform config location, e.g. `~/.config/ddbridge/ddbridge.toml`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ddbridge").map(|d| d.config_dir().join("ddbridge.toml"))
    }

    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("initial_store_capacity", self.initial_store_capacity),
            ("max_arena_bytes", self.max_arena_bytes),
            ("pull_chunk_size", self.pull_chunk_size),
            ("max_buffered_bytes", self.max_buffered_bytes),
            ("engine.pcm_frames_per_packet", self.engine.pcm_frames_per_packet),
            ("engine.audio_frame_samples", self.engine.audio_frame_samples),
            ("engine.max_packet_bytes", self.engine.max_packet_bytes),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be greater than zero")));
        }
        if self.initial_store_capacity > self.max_arena_bytes {
            return Err(Error::Config(format!(
                "initial_store_capacity ({}) exceeds max_arena_bytes ({})",
                self.initial_store_capacity, self.max_arena_bytes
            )));
        }
        Ok(())
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
