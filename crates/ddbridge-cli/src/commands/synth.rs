//! Synth command - write a synthetic media file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ddbridge_engine::synth::{self, AviOptions};
use tracing::info;

use crate::SynthKind;

/// Shape of the file to write.
#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub seconds: f32,
    pub sample_rate: u32,
    pub audio: bool,
}

/// Run the synth command.
pub fn run(kind: SynthKind, output: &Path, options: &SynthOptions) -> Result<()> {
    if options.width == 0 || options.height == 0 {
        bail!("width and height must be greater than zero");
    }
    if options.sample_rate == 0 {
        bail!("sample rate must be greater than zero");
    }

    let bytes = match kind {
        SynthKind::Wav => {
            let frames = (options.seconds.max(0.0) * options.sample_rate as f32) as usize;
            synth::wav(options.sample_rate, 2, frames)
        }
        SynthKind::Avi => synth::avi(&AviOptions {
            audio: options.audio.then_some((options.sample_rate, 2)),
            ..AviOptions::new(options.width, options.height, options.frames)
        }),
        SynthKind::Y4m => synth::y4m(options.width, options.height, options.frames),
    };

    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("wrote {} bytes to {}", bytes.len(), output.display());
    println!("{}: {} bytes", output.display(), bytes.len());
    Ok(())
}
