//! Decode command - run a media file through the whole bridge lifecycle.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use ddbridge::{Bridge, DemuxPhase, FrameView, Reentry, ERROR_STREAM_INDEX};
use ddbridge_core::{BridgeConfig, StreamInfo};
use tracing::{error, info, warn};

use crate::FeedMode;

/// Options for the decode command.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub video_out: Option<PathBuf>,
    pub audio_out: Option<PathBuf>,
    pub mode: FeedMode,
    pub chunk_size: Option<usize>,
}

/// Where frames of one media kind go.
#[derive(Default)]
struct FrameSink {
    out: Option<BufWriter<File>>,
    frames: u64,
    bytes: u64,
    /// First write failure; later frames are only counted.
    error: Option<io::Error>,
}

impl FrameSink {
    fn create(path: Option<&Path>) -> Result<Self> {
        let out = path
            .map(|p| {
                File::create(p)
                    .map(BufWriter::new)
                    .with_context(|| format!("Failed to create {}", p.display()))
            })
            .transpose()?;
        Ok(Self {
            out,
            ..Self::default()
        })
    }

    fn accept(&mut self, frame: FrameView<'_>) {
        self.frames += 1;
        self.bytes += frame.len() as u64;
        if self.error.is_some() {
            return;
        }
        if let Some(out) = self.out.as_mut() {
            if let Err(e) = out.write_all(frame.data) {
                error!("Failed to write frame of stream {}: {e}", frame.stream_index);
                self.error = Some(e);
            }
        }
    }

    fn finish(self) -> Result<(u64, u64)> {
        if let Some(e) = self.error {
            return Err(e.into());
        }
        if let Some(mut out) = self.out {
            out.flush()?;
        }
        Ok((self.frames, self.bytes))
    }
}

/// State the bridge callbacks share with the command.
struct Host {
    video: RefCell<FrameSink>,
    audio: RefCell<FrameSink>,
    packets: Cell<u64>,
    decode_errors: Cell<u64>,
}

impl Host {
    fn on_stream_selected(&self, reentry: &mut Reentry<'_>) {
        for stream in reentry.streams() {
            info!(
                "stream {}: {:?} {:?}{}",
                stream.index,
                stream.kind,
                stream.codec,
                if stream.is_decodable() { "" } else { " (not decodable)" }
            );
        }
        if let Err(e) = reentry.open_decoder() {
            warn!("could not open the decoder: {e}");
        }
    }

    fn on_packet_parsed(&self, reentry: &mut Reentry<'_>, stream_index: u32) {
        if stream_index == ERROR_STREAM_INDEX {
            // The bridge keeps the error; `run` reports it.
            return;
        }
        self.packets.set(self.packets.get() + 1);
        if !reentry
            .stream(stream_index)
            .is_some_and(StreamInfo::is_decodable)
        {
            return;
        }

        let result = reentry.decode(
            stream_index,
            |frame| self.video.borrow_mut().accept(frame),
            |frame| self.audio.borrow_mut().accept(frame),
        );
        if let Err(e) = result {
            if e.is_recoverable() {
                warn!("{e}");
                self.decode_errors.set(self.decode_errors.get() + 1);
            } else {
                error!("{e}");
            }
        }
    }
}

/// Run the decode command.
pub fn run(input: &Path, mut config: BridgeConfig, options: &DecodeOptions) -> Result<()> {
    let mut file =
        File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    if let Some(chunk_size) = options.chunk_size {
        if chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }
        config.pull_chunk_size = chunk_size;
        config.max_buffered_bytes = config.max_buffered_bytes.max(chunk_size);
    }

    let host = Rc::new(Host {
        video: RefCell::new(FrameSink::create(options.video_out.as_deref())?),
        audio: RefCell::new(FrameSink::create(options.audio_out.as_deref())?),
        packets: Cell::new(0),
        decode_errors: Cell::new(0),
    });

    let mut bridge = Bridge::new(config)?;
    info!("bridge {} decoding {} ({:?})", bridge.id(), input.display(), options.mode);
    bridge.open_store()?;

    let selected = Rc::clone(&host);
    let parsed = Rc::clone(&host);
    let on_stream_selected = move |reentry: &mut Reentry<'_>| selected.on_stream_selected(reentry);
    let on_packet_parsed =
        move |reentry: &mut Reentry<'_>, index: u32| parsed.on_packet_parsed(reentry, index);

    let fed = match options.mode {
        FeedMode::Bulk => {
            let fed = bridge.feed_from(&mut file)?;
            bridge.open_demuxer(on_stream_selected, on_packet_parsed)?;
            fed
        }
        FeedMode::Stream => {
            bridge.open_demuxer(on_stream_selected, on_packet_parsed)?;
            bridge.feed_from(&mut file)?
        }
    };
    info!("fed {} bytes in {} writes", fed.bytes_written, fed.writes);

    if bridge.decoder_open() {
        bridge.close_decoder(
            |frame| host.video.borrow_mut().accept(frame),
            |frame| host.audio.borrow_mut().accept(frame),
        )?;
    }
    let demux_error = bridge.demux_error().map(ToString::to_string);
    if bridge.demux_phase() != DemuxPhase::Closed {
        bridge.close_demuxer()?;
    }
    bridge.close_store()?;
    drop(bridge);

    let host = Rc::try_unwrap(host)
        .map_err(|_| anyhow::anyhow!("bridge callbacks still hold the frame sinks"))?;
    let (video_frames, video_bytes) = host.video.into_inner().finish()?;
    let (audio_frames, audio_bytes) = host.audio.into_inner().finish()?;

    println!("packets:       {}", host.packets.get());
    println!("video frames:  {video_frames} ({video_bytes} bytes)");
    println!("audio frames:  {audio_frames} ({audio_bytes} bytes)");
    if host.decode_errors.get() > 0 {
        println!("decode errors: {}", host.decode_errors.get());
    }

    if let Some(e) = demux_error {
        bail!("demuxing stopped early: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use ddbridge_engine::synth;

    fn options(dir: &Path, mode: FeedMode, chunk_size: Option<usize>) -> DecodeOptions {
        DecodeOptions {
            video_out: Some(dir.join("video.raw")),
            audio_out: Some(dir.join("audio.f32")),
            mode,
            chunk_size,
        }
    }

    fn out_len(path: Option<&Path>) -> u64 {
        std::fs::metadata(path.unwrap()).unwrap().len()
    }

    #[test]
    fn test_decode_y4m_bulk_and_stream() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.y4m");
        std::fs::write(&input, synth::y4m(16, 16, 3)).unwrap();

        for (mode, chunk_size) in [(FeedMode::Bulk, None), (FeedMode::Stream, Some(100))] {
            let options = options(dir.path(), mode, chunk_size);
            run(&input, BridgeConfig::default(), &options).unwrap();
            // Three 4:2:0 frames of 16x16 luma and two 8x8 chroma planes.
            assert_eq!(out_len(options.video_out.as_deref()), 3 * 384);
            assert_eq!(out_len(options.audio_out.as_deref()), 0);
        }
    }

    #[test]
    fn test_decode_wav_flushes_audio() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tone.wav");
        std::fs::write(&input, synth::wav(8000, 1, 3000)).unwrap();

        let options = options(dir.path(), FeedMode::Stream, Some(512));
        run(&input, BridgeConfig::default(), &options).unwrap();
        assert_eq!(out_len(options.audio_out.as_deref()), 3000 * 4);
    }

    #[test]
    fn test_decode_rejects_unknown_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        std::fs::write(&input, b"this is not a media container at all").unwrap();

        for mode in [FeedMode::Bulk, FeedMode::Stream] {
            let options = options(dir.path(), mode, None);
            assert!(run(&input, BridgeConfig::default(), &options).is_err());
        }
    }

    #[test]
    fn test_decode_rejects_zero_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.y4m");
        std::fs::write(&input, synth::y4m(4, 4, 1)).unwrap();
        let options = options(dir.path(), FeedMode::Stream, Some(0));
        assert!(run(&input, BridgeConfig::default(), &options).is_err());
    }
}
