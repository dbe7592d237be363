//! Synthetic sample containers.
//!
//! Small, deterministic WAV / AVI / Y4M files for tests and for
//! `ddbridge synth`. Video frames carry a moving diagonal gradient, audio is
//! a 440 Hz tone.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::f32::consts::TAU;

use ddbridge_core::PixelFormat;

const TONE_HZ: f32 = 440.0;

/// Shape of a synthetic AVI file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AviOptions {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub fps: u32,
    /// Interleaved PCM track as `(sample_rate, channels)`.
    pub audio: Option<(u32, u16)>,
    /// Group each frame's chunks into a `LIST rec`.
    pub rec_lists: bool,
    /// Scatter `JUNK` chunks through the file.
    pub junk: bool,
}

impl AviOptions {
    /// Video-only, 25 fps, no grouping.
    pub const fn new(width: u32, height: u32, frames: u32) -> Self {
        Self {
            width,
            height,
            frames,
            fps: 25,
            audio: None,
            rec_lists: false,
            junk: false,
        }
    }
}

fn push_chunk(out: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
}

fn push_list(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    let mut list = kind.to_vec();
    list.extend_from_slice(body);
    push_chunk(out, b"LIST", &list);
}

fn riff(form: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 12);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
    out.extend_from_slice(form);
    out.extend_from_slice(body);
    out
}

fn wave_format(sample_rate: u32, channels: u16) -> Vec<u8> {
    let block_align = channels * 2;
    let mut fmt = Vec::with_capacity(18);
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&channels.to_le_bytes());
    fmt.extend_from_slice(&sample_rate.to_le_bytes());
    fmt.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    fmt.extend_from_slice(&block_align.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());
    fmt
}

/// Interleaved s16le tone starting at sample frame `start`.
fn tone(sample_rate: u32, channels: u16, start: usize, frames: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames * usize::from(channels) * 2);
    for n in start..start + frames {
        let phase = TAU * TONE_HZ * n as f32 / sample_rate as f32;
        let sample = (phase.sin() * f32::from(i16::MAX) * 0.25) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

/// A 16-bit PCM WAV file.
pub fn wav(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let mut body = Vec::new();
    push_chunk(&mut body, b"fmt ", &wave_format(sample_rate, channels));
    push_chunk(&mut body, b"data", &tone(sample_rate, channels, 0, frames));
    riff(b"WAVE", &body)
}

/// One frame of `format` filled with a gradient shifted by `frame`.
fn gradient(format: PixelFormat, width: u32, height: u32, frame: u32) -> Vec<u8> {
    let size = format.frame_size(width, height).unwrap_or_default();
    let stride = format.row_stride(width).unwrap_or(1);
    let luma = stride * height as usize;
    (0..size)
        .map(|i| {
            if i < luma {
                let (x, y) = (i % stride, i / stride);
                (x + y + frame as usize) as u8
            } else {
                128
            }
        })
        .collect()
}

fn avi_main_header(options: &AviOptions, streams: u32) -> Vec<u8> {
    let mut avih = Vec::with_capacity(56);
    for value in [
        1_000_000 / options.fps.max(1),
        0,
        0,
        0x10, // AVIF_HASINDEX
        options.frames,
        0,
        streams,
        0,
        options.width,
        options.height,
    ] {
        avih.extend_from_slice(&value.to_le_bytes());
    }
    avih.resize(56, 0);
    avih
}

fn stream_header(
    kind: &[u8; 4],
    handler: &[u8; 4],
    scale: u32,
    rate: u32,
    length: u32,
) -> Vec<u8> {
    let mut strh = Vec::with_capacity(56);
    strh.extend_from_slice(kind);
    strh.extend_from_slice(handler);
    strh.extend_from_slice(&[0; 12]); // flags, priority, language, initial frames
    strh.extend_from_slice(&scale.to_le_bytes());
    strh.extend_from_slice(&rate.to_le_bytes());
    strh.extend_from_slice(&0u32.to_le_bytes()); // start
    strh.extend_from_slice(&length.to_le_bytes());
    strh.resize(56, 0);
    strh
}

fn bitmap_info(width: u32, height: u32) -> Vec<u8> {
    let mut strf = Vec::with_capacity(40);
    strf.extend_from_slice(&40u32.to_le_bytes());
    strf.extend_from_slice(&(width as i32).to_le_bytes());
    // Positive height: bottom-up rows.
    strf.extend_from_slice(&(height as i32).to_le_bytes());
    strf.extend_from_slice(&1u16.to_le_bytes());
    strf.extend_from_slice(&24u16.to_le_bytes());
    strf.extend_from_slice(&0u32.to_le_bytes());
    let size = PixelFormat::Bgr24
        .frame_size(width, height)
        .unwrap_or_default() as u32;
    strf.extend_from_slice(&size.to_le_bytes());
    strf.resize(40, 0);
    strf
}

/// An uncompressed AVI: bottom-up BGR24 video, optionally with s16le audio.
pub fn avi(options: &AviOptions) -> Vec<u8> {
    let streams = if options.audio.is_some() { 2 } else { 1 };

    let mut hdrl = Vec::new();
    push_chunk(&mut hdrl, b"avih", &avi_main_header(options, streams));
    let mut video_strl = Vec::new();
    push_chunk(
        &mut video_strl,
        b"strh",
        &stream_header(b"vids", b"DIB ", 1, options.fps, options.frames),
    );
    push_chunk(&mut video_strl, b"strf", &bitmap_info(options.width, options.height));
    push_list(&mut hdrl, b"strl", &video_strl);
    if let Some((sample_rate, channels)) = options.audio {
        let mut audio_strl = Vec::new();
        push_chunk(
            &mut audio_strl,
            b"strh",
            &stream_header(b"auds", &[0; 4], 1, sample_rate, 0),
        );
        push_chunk(&mut audio_strl, b"strf", &wave_format(sample_rate, channels));
        push_list(&mut hdrl, b"strl", &audio_strl);
    }

    let mut movi = Vec::new();
    let mut index = Vec::new();
    let mut audio_pos = 0;
    for frame in 0..options.frames {
        let mut group = Vec::new();
        if options.junk {
            push_chunk(&mut group, b"JUNK", b"pad");
        }
        let video = gradient(PixelFormat::Bgr24, options.width, options.height, frame);
        index.push((*b"00dc", video.len()));
        push_chunk(&mut group, b"00dc", &video);
        if let Some((sample_rate, channels)) = options.audio {
            let frames = (sample_rate / options.fps.max(1)) as usize;
            let audio = tone(sample_rate, channels, audio_pos, frames);
            audio_pos += frames;
            index.push((*b"01wb", audio.len()));
            push_chunk(&mut group, b"01wb", &audio);
        }
        if options.rec_lists {
            push_list(&mut movi, b"rec ", &group);
        } else {
            movi.extend_from_slice(&group);
        }
    }

    let mut idx1 = Vec::with_capacity(index.len() * 16);
    let mut offset = 4u32;
    for (id, len) in index {
        idx1.extend_from_slice(&id);
        idx1.extend_from_slice(&0x10u32.to_le_bytes()); // AVIIF_KEYFRAME
        idx1.extend_from_slice(&offset.to_le_bytes());
        idx1.extend_from_slice(&(len as u32).to_le_bytes());
        offset += 8 + (len as u32 + 1) / 2 * 2;
    }

    let mut body = Vec::new();
    push_list(&mut body, b"hdrl", &hdrl);
    if options.junk {
        push_chunk(&mut body, b"JUNK", &[0; 28]);
    }
    push_list(&mut body, b"movi", &movi);
    push_chunk(&mut body, b"idx1", &idx1);
    riff(b"AVI ", &body)
}

/// A 4:2:0 YUV4MPEG2 stream.
pub fn y4m(width: u32, height: u32, frames: u32) -> Vec<u8> {
    let mut out = format!("YUV4MPEG2 W{width} H{height} F25:1 Ip A1:1 C420jpeg\n").into_bytes();
    for frame in 0..frames {
        out.extend_from_slice(b"FRAME\n");
        out.extend(gradient(PixelFormat::Yuv420p, width, height, frame));
    }
    out
}
