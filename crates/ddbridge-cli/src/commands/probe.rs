//! Probe command - list the streams of a media file.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use ddbridge::Bridge;
use ddbridge_core::BridgeConfig;
use tracing::{info, warn};

/// Run the probe command.
pub fn run(input: &Path, config: BridgeConfig) -> Result<()> {
    let mut file =
        File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;

    let mut bridge = Bridge::new(config)?;
    bridge.open_store()?;
    let fed = bridge.feed_from(&mut file)?;
    info!("loaded {} bytes from {}", fed.bytes_written, input.display());

    // Stop as soon as the streams are known.
    bridge.open_demuxer(
        |reentry| {
            if let Err(e) = reentry.close_demuxer() {
                warn!("could not stop the demuxer: {e}");
            }
        },
        |_, _| {},
    )?;

    println!("{}", serde_json::to_string_pretty(bridge.streams())?);
    bridge.close_store()?;
    Ok(())
}
