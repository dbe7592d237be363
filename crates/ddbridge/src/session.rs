//! State shared by the bridge and its callbacks.
//!
//! A [`Session`] holds everything except the demuxer itself. While the
//! demuxer runs it is taken out of the bridge, so callbacks can be handed a
//! [`Reentry`] over the session without aliasing the running scan.

use std::collections::{HashMap, VecDeque};

use ddbridge_core::{BridgeConfig, DecodeStatus, Error, Handle, Packet, Result, StreamInfo};
use ddbridge_engine::Engine;
use tracing::debug;

use crate::arena::{Arena, Region};
use crate::decode::{DecodeController, FrameView};
use crate::lifecycle::{DemuxPhase, Lifecycle};
use crate::store::{Store, WriteWindow};

pub(crate) struct Session {
    pub(crate) config: BridgeConfig,
    pub(crate) engine: Engine,
    pub(crate) arena: Arena,
    pub(crate) store: Option<Store>,
    pub(crate) lifecycle: Lifecycle,
    /// Streams of the most recent selection.
    pub(crate) streams: Vec<StreamInfo>,
    /// Parsed packets waiting for a decode, per stream.
    pub(crate) queues: HashMap<u32, VecDeque<Packet>>,
    pub(crate) decoder: DecodeController,
    /// Set by a callback; honoured once the callback returns.
    pub(crate) close_demuxer_requested: bool,
}

impl Session {
    pub(crate) fn new(config: BridgeConfig) -> Self {
        Self {
            engine: Engine::new(config.engine.clone()),
            arena: Arena::new(config.max_arena_bytes),
            config,
            store: None,
            lifecycle: Lifecycle::new(),
            streams: Vec::new(),
            queues: HashMap::new(),
            decoder: DecodeController::default(),
            close_demuxer_requested: false,
        }
    }

    pub(crate) fn store(&self) -> Result<&Store> {
        self.store.as_ref().ok_or(Error::NotOpen(Handle::Store))
    }

    pub(crate) fn store_mut(&mut self) -> Result<&mut Store> {
        self.store.as_mut().ok_or(Error::NotOpen(Handle::Store))
    }

    pub(crate) fn open_store(&mut self) -> Result<()> {
        if self.lifecycle.store_open() {
            return Err(Error::AlreadyOpen(Handle::Store));
        }
        // A capacity failure leaves the store closed.
        let store = Store::open(
            &mut self.arena,
            self.lifecycle.store_epoch() + 1,
            self.config.initial_store_capacity,
        )?;
        let epoch = self.lifecycle.open_store()?;
        debug_assert_eq!(epoch, store.epoch());
        self.store = Some(store);
        Ok(())
    }

    pub(crate) fn close_store(&mut self) -> Result<()> {
        self.lifecycle.close_store()?;
        if let Some(store) = self.store.take() {
            debug!(
                "released store epoch {} after {} bytes",
                store.epoch(),
                store.len(&self.arena)
            );
        }
        self.arena.release(Region::Store);
        Ok(())
    }

    pub(crate) fn negotiate(&mut self, len: usize) -> Result<WriteWindow> {
        let store = self.store.as_mut().ok_or(Error::NotOpen(Handle::Store))?;
        store.negotiate(&mut self.arena, len)
    }

    pub(crate) fn window_mut(&mut self, window: &WriteWindow) -> Result<&mut [u8]> {
        let store = self.store.as_ref().ok_or(Error::NotOpen(Handle::Store))?;
        store.window_mut(&mut self.arena, window)
    }

    pub(crate) fn commit(&mut self, len: usize) -> Result<()> {
        let store = self.store.as_mut().ok_or(Error::NotOpen(Handle::Store))?;
        store.commit(&mut self.arena, len)
    }

    /// Unconsumed store bytes beyond the demuxer's cursor.
    pub(crate) fn backlog(&self) -> usize {
        self.store
            .as_ref()
            .map_or(0, |store| store.backlog(&self.arena))
    }

    /// Replace the stream list and drop everything tied to the previous one.
    pub(crate) fn select_streams(&mut self, streams: Vec<StreamInfo>) {
        self.queues = streams
            .iter()
            .map(|stream| (stream.index, VecDeque::new()))
            .collect();
        self.decoder.reset();
        self.streams = streams;
        self.lifecycle.select_streams();
    }

    pub(crate) fn queue_packet(&mut self, packet: Packet) {
        self.queues
            .entry(packet.stream_index)
            .or_default()
            .push_back(packet);
    }

    /// Close the demuxer and discard what it left behind.
    pub(crate) fn close_demuxer(&mut self) -> Result<()> {
        self.lifecycle.close_demuxer()?;
        self.discard_packets();
        Ok(())
    }

    pub(crate) fn discard_packets(&mut self) {
        let dropped: usize = self.queues.values().map(VecDeque::len).sum();
        if dropped > 0 {
            debug!("discarding {dropped} undecoded packets");
        }
        self.queues.values_mut().for_each(VecDeque::clear);
    }

    pub(crate) fn stream(&self, stream_index: u32) -> Option<&StreamInfo> {
        self.streams.iter().find(|stream| stream.index == stream_index)
    }
}

/// The operations a callback may perform while the bridge is inside
/// `open_demuxer`, a commit, or an end-of-input signal.
///
/// There is no store write here. Bytes only enter through the host's own
/// negotiate/commit calls.
pub struct Reentry<'a> {
    session: &'a mut Session,
}

impl<'a> Reentry<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// Streams of the current selection.
    pub fn streams(&self) -> &[StreamInfo] {
        &self.session.streams
    }

    pub fn stream(&self, stream_index: u32) -> Option<&StreamInfo> {
        self.session.stream(stream_index)
    }

    pub fn demux_phase(&self) -> DemuxPhase {
        self.session.lifecycle.demux_phase()
    }

    pub fn open_decoder(&mut self) -> Result<()> {
        self.session.lifecycle.open_decoder()
    }

    /// See [`crate::Bridge::decode`].
    pub fn decode<V, A>(
        &mut self,
        stream_index: u32,
        mut on_video_frame: V,
        mut on_audio_frame: A,
    ) -> Result<DecodeStatus>
    where
        V: FnMut(FrameView<'_>),
        A: FnMut(FrameView<'_>),
    {
        self.session
            .decode(stream_index, &mut on_video_frame, &mut on_audio_frame)
    }

    pub fn close_decoder<V, A>(
        &mut self,
        mut on_video_frame: V,
        mut on_audio_frame: A,
    ) -> Result<()>
    where
        V: FnMut(FrameView<'_>),
        A: FnMut(FrameView<'_>),
    {
        self.session
            .close_decoder(&mut on_video_frame, &mut on_audio_frame)
    }

    pub fn close_store(&mut self) -> Result<()> {
        self.session.close_store()
    }

    /// Ask for the demuxer to close once the current callback returns.
    pub fn close_demuxer(&mut self) -> Result<()> {
        if !self.session.lifecycle.demux_phase().is_open() {
            return Err(Error::NotOpen(Handle::Demuxer));
        }
        self.session.close_demuxer_requested = true;
        Ok(())
    }
}
