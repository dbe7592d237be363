//! The host-facing bridge.
//!
//! [`Bridge`] sequences the store, demuxer and decoder handles over one
//! arena. Every operation either succeeds or returns an [`Error`] whose
//! [`Error::status_code`] is the boundary status, and callbacks run
//! synchronously on the caller's stack.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::{BridgeConfig, DecodeStatus, Error, Result, StreamInfo};
use tracing::{debug, info_span, warn, Span};
use uuid::Uuid;

use crate::decode::FrameView;
use crate::demux::DemuxController;
use crate::lifecycle::DemuxPhase;
use crate::session::{Reentry, Session};
use crate::store::{Purpose, WriteWindow};

/// One host/engine session.
pub struct Bridge {
    id: Uuid,
    span: Span,
    pub(crate) session: Session,
    /// Parked between resumes. Taken out while it runs.
    demuxer: Option<DemuxController>,
    /// Why the demuxer entered [`DemuxPhase::Failed`].
    last_demux_error: Option<Error>,
}

impl Bridge {
    /// Create a bridge after validating `config`.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        let span = info_span!("bridge", %id);
        span.in_scope(|| {
            debug!(
                "bridge created (arena limit {} bytes, pull chunk {} bytes)",
                config.max_arena_bytes, config.pull_chunk_size
            );
        });
        Ok(Self {
            id,
            span,
            session: Session::new(config),
            demuxer: None,
            last_demux_error: None,
        })
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn config(&self) -> &BridgeConfig {
        &self.session.config
    }

    // --- Store ---

    pub fn open_store(&mut self) -> Result<()> {
        let _entered = self.span.clone().entered();
        self.session.open_store()
    }

    /// Close the store. An open demuxer or decoder stays open but reports
    /// [`Error::SourceClosed`] from then on.
    pub fn close_store(&mut self) -> Result<()> {
        let _entered = self.span.clone().entered();
        self.session.close_store()
    }

    /// Reserve room for exactly `requested_len` bytes.
    ///
    /// The returned window stays valid until it is committed, another
    /// negotiation happens, or the arena moves the store.
    pub fn negotiate_capacity(
        &mut self,
        purpose: Purpose,
        requested_len: usize,
    ) -> Result<WriteWindow> {
        let _entered = self.span.clone().entered();
        match purpose {
            Purpose::StoreWrite => self.session.negotiate(requested_len),
        }
    }

    /// The writable bytes of a negotiated window.
    pub fn window_mut(&mut self, window: &WriteWindow) -> Result<&mut [u8]> {
        self.session.window_mut(window)
    }

    /// Publish the first `len` bytes of the pending window.
    ///
    /// A streaming demuxer resumes before this returns, so callbacks may run.
    pub fn commit_write(&mut self, purpose: Purpose, len: usize) -> Result<()> {
        let _entered = self.span.clone().entered();
        match purpose {
            Purpose::StoreWrite => self.session.commit(len)?,
        }
        self.resume_demuxer();
        Ok(())
    }

    /// No more bytes will be written. Lets a streaming demuxer finish.
    pub fn signal_end_of_input(&mut self) -> Result<()> {
        let _entered = self.span.clone().entered();
        let store = self.session.store_mut()?;
        if store.end_of_input() {
            return Ok(());
        }
        if store.pending().is_some() {
            return Err(Error::protocol(
                "end of input signalled with a negotiated write still pending",
            ));
        }
        store.seal();
        debug!("end of input after {} bytes", self.store_len()?);
        self.resume_demuxer();
        Ok(())
    }

    /// Logical store length, consumed bytes included.
    pub fn store_len(&self) -> Result<u64> {
        Ok(self.session.store()?.len(&self.session.arena))
    }

    /// Bytes the demuxer has consumed so far.
    pub fn store_consumed(&self) -> Result<u64> {
        Ok(self.session.store()?.consumed())
    }

    pub fn arena_size(&self) -> usize {
        self.session.arena.size()
    }

    // --- Demuxer ---

    /// Open a demuxer over the store.
    ///
    /// If bytes were already committed the store is sealed and scanned to the
    /// end before this returns (bulk). Otherwise the scan advances on every
    /// later commit (streaming). Errors found here are returned and leave the
    /// demuxer closed. Errors found on a later resume move it to
    /// [`DemuxPhase::Failed`] and are reported as
    /// `on_packet_parsed(ERROR_STREAM_INDEX)`.
    ///
    /// Any earlier commit selects bulk mode, even a partial first chunk:
    /// the store is sealed and later writes fail with
    /// [`Error::ProtocolViolation`]. A streaming host opens the demuxer
    /// before its first write.
    pub fn open_demuxer<S, P>(
        &mut self,
        on_stream_selected: S,
        on_packet_parsed: P,
    ) -> Result<()>
    where
        S: FnMut(&mut Reentry<'_>) + 'static,
        P: FnMut(&mut Reentry<'_>, u32) + 'static,
    {
        let _entered = self.span.clone().entered();
        let epoch = self.session.lifecycle.open_demuxer()?;
        self.session.close_demuxer_requested = false;
        self.last_demux_error = None;

        let store = self.session.store_mut()?;
        if store.commits() > 0 && store.pending().is_none() {
            store.seal();
            debug!("bulk demux over {} bytes", self.store_len()?);
        } else {
            debug!("streaming demux");
        }

        let mut demuxer =
            DemuxController::new(epoch, Box::new(on_stream_selected), Box::new(on_packet_parsed));
        match demuxer.pump(&mut self.session) {
            Ok(()) => {
                self.park(demuxer);
                Ok(())
            }
            Err(e) => {
                warn!("open_demuxer failed: {e}");
                self.session.close_demuxer_requested = false;
                self.session.lifecycle.reset_demuxer();
                self.session.discard_packets();
                Err(e)
            }
        }
    }

    /// Close the demuxer, dropping its reader, cursor state and queued packets.
    pub fn close_demuxer(&mut self) -> Result<()> {
        let _entered = self.span.clone().entered();
        self.session.close_demuxer()?;
        if let Some(demuxer) = self.demuxer.take() {
            debug!("demuxer dropped after {} packets", demuxer.packets());
        }
        self.last_demux_error = None;
        Ok(())
    }

    pub fn demux_phase(&self) -> DemuxPhase {
        self.session.lifecycle.demux_phase()
    }

    /// The error that moved the demuxer to [`DemuxPhase::Failed`].
    pub const fn demux_error(&self) -> Option<&Error> {
        self.last_demux_error.as_ref()
    }

    /// Streams of the current selection.
    pub fn streams(&self) -> &[StreamInfo] {
        &self.session.streams
    }

    /// Run a parked demuxer over newly available bytes.
    fn resume_demuxer(&mut self) {
        if !self.demux_phase().is_active() {
            return;
        }
        let Some(mut demuxer) = self.demuxer.take() else {
            return;
        };
        if let Err(e) = demuxer.pump(&mut self.session) {
            warn!("demuxer failed: {e}");
            self.session.lifecycle.fail_demuxer();
            self.last_demux_error = Some(e);
            demuxer.report_failure(&mut self.session);
        }
        self.park(demuxer);
    }

    /// Keep the demuxer for the next resume, unless a callback closed it.
    fn park(&mut self, demuxer: DemuxController) {
        if std::mem::take(&mut self.session.close_demuxer_requested) {
            debug!("closing demuxer as requested by a callback");
            self.session.lifecycle.reset_demuxer();
            self.session.discard_packets();
            self.last_demux_error = None;
        } else {
            self.demuxer = Some(demuxer);
        }
    }

    // --- Decoder ---

    pub fn open_decoder(&mut self) -> Result<()> {
        let _entered = self.span.clone().entered();
        self.session.lifecycle.open_decoder()
    }

    /// Decode the next queued packet of `stream_index`.
    ///
    /// Frames go to `on_video_frame` or `on_audio_frame` in decode order.
    /// Returns [`DecodeStatus::NoFrame`] when the codec is still buffering.
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
        let _entered = self.span.clone().entered();
        self.session
            .decode(stream_index, &mut on_video_frame, &mut on_audio_frame)
    }

    /// Flush buffered frames through the callbacks and close the decoder.
    pub fn close_decoder<V, A>(
        &mut self,
        mut on_video_frame: V,
        mut on_audio_frame: A,
    ) -> Result<()>
    where
        V: FnMut(FrameView<'_>),
        A: FnMut(FrameView<'_>),
    {
        let _entered = self.span.clone().entered();
        self.session
            .close_decoder(&mut on_video_frame, &mut on_audio_frame)
    }

    pub fn decoder_open(&self) -> bool {
        self.session.lifecycle.decoder_open()
    }
}
