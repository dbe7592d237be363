//! CLI command implementations.

pub mod decode;
pub mod probe;
pub mod synth;

use std::path::Path;

use anyhow::{Context, Result};
use ddbridge_core::BridgeConfig;
use tracing::info;

/// Load `path`, or the platform default location if none was given.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let config = match path {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match BridgeConfig::default_path() {
            Some(path) => BridgeConfig::load_or_default(&path)?,
            None => BridgeConfig::default(),
        },
    };
    info!(
        "arena limit {} bytes, pull chunk {} bytes",
        config.max_arena_bytes, config.pull_chunk_size
    );
    Ok(config)
}
