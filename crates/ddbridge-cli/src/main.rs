//! # ddbridge
//!
//! Host harness for the ddbridge engine. Feeds media files through the
//! bridge the way an embedding host would.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stream media through the ddbridge demux/decode engine.
#[derive(Parser)]
#[command(name = "ddbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "DDBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the streams of a media file as JSON
    Probe {
        /// Input media file
        input: PathBuf,
    },

    /// Decode a media file, writing raw frames to files
    Decode {
        /// Input media file
        input: PathBuf,

        /// Append decoded video frames to this file
        #[arg(long)]
        video_out: Option<PathBuf>,

        /// Append decoded audio frames (f32le, interleaved) to this file
        #[arg(long)]
        audio_out: Option<PathBuf>,

        /// How bytes reach the engine
        #[arg(short, long, value_enum, default_value_t = FeedMode::Bulk)]
        mode: FeedMode,

        /// Bytes per write in stream mode (defaults to the configured pull chunk size)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Write a synthetic media file
    Synth {
        /// Container to produce
        #[arg(value_enum)]
        kind: SynthKind,

        /// Output path
        output: PathBuf,

        /// Frame width (avi, y4m)
        #[arg(long, default_value = "320")]
        width: u32,

        /// Frame height (avi, y4m)
        #[arg(long, default_value = "240")]
        height: u32,

        /// Number of video frames (avi, y4m)
        #[arg(long, default_value = "25")]
        frames: u32,

        /// Duration of the tone (wav)
        #[arg(long, default_value = "1.0")]
        seconds: f32,

        /// Sample rate (wav, and the avi audio track)
        #[arg(long, default_value = "44100")]
        sample_rate: u32,

        /// Add an interleaved PCM track (avi)
        #[arg(long)]
        audio: bool,
    },
}

/// How `decode` moves the input into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeedMode {
    /// Load the whole file, then open the demuxer.
    Bulk,
    /// Open the demuxer first, then feed the file chunk by chunk.
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SynthKind {
    Wav,
    Avi,
    Y4m,
}

fn setup_logging(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "ddbridge=warn,ddbridge_cli=info",
        1 => "ddbridge=info,ddbridge_engine=info,ddbridge_cli=info",
        2 => "ddbridge=debug,ddbridge_engine=debug,ddbridge_cli=debug",
        _ => "trace",
    };

    // Logs go to stderr so JSON on stdout stays clean.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    debug!("ddbridge v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Probe { input } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::probe::run(&input, config)
        }
        Commands::Decode {
            input,
            video_out,
            audio_out,
            mode,
            chunk_size,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let options = commands::decode::DecodeOptions {
                video_out,
                audio_out,
                mode,
                chunk_size,
            };
            commands::decode::run(&input, config, &options)
        }
        Commands::Synth {
            kind,
            output,
            width,
            height,
            frames,
            seconds,
            sample_rate,
            audio,
        } => {
            let options = commands::synth::SynthOptions {
                width,
                height,
                frames,
                seconds,
                sample_rate,
                audio,
            };
            commands::synth::run(kind, &output, &options)
        }
    }
}
