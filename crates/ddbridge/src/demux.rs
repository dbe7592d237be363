//! The demux controller.
//!
//! Scans the unconsumed store bytes with the engine's container reader,
//! queueing packets and firing the host callbacks as it goes. A scan runs
//! until the reader runs out of buffered bytes, the input ends, or a
//! callback asks for the demuxer to close.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::status::ERROR_STREAM_INDEX;
use ddbridge_core::{Error, Result};
use ddbridge_engine::{ContainerReader, Step};
use tracing::{debug, trace, warn};

use crate::lifecycle::DemuxPhase;
use crate::session::{Reentry, Session};

pub(crate) type StreamSelectedFn = Box<dyn FnMut(&mut Reentry<'_>)>;
pub(crate) type PacketParsedFn = Box<dyn FnMut(&mut Reentry<'_>, u32)>;

pub(crate) struct DemuxController {
    /// Store epoch this demuxer reads from.
    epoch: u64,
    /// Created once the container is recognized.
    reader: Option<Box<dyn ContainerReader>>,
    on_stream_selected: StreamSelectedFn,
    on_packet_parsed: PacketParsedFn,
    packets: u64,
}

impl DemuxController {
    pub(crate) fn new(
        epoch: u64,
        on_stream_selected: StreamSelectedFn,
        on_packet_parsed: PacketParsedFn,
    ) -> Self {
        Self {
            epoch,
            reader: None,
            on_stream_selected,
            on_packet_parsed,
            packets: 0,
        }
    }

    pub(crate) const fn packets(&self) -> u64 {
        self.packets
    }

    /// Scan as far as the buffered bytes allow.
    pub(crate) fn pump(&mut self, session: &mut Session) -> Result<()> {
        loop {
            session.lifecycle.check_source(self.epoch)?;
            if session.close_demuxer_requested {
                return Ok(());
            }
            let progressed = match session.lifecycle.demux_phase() {
                DemuxPhase::Selecting => self.select(session)?,
                DemuxPhase::Running => self.parse_packet(session)?,
                DemuxPhase::Closed | DemuxPhase::Finished | DemuxPhase::Failed => false,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    /// Tell the host the demuxer stopped on an error it could not return.
    pub(crate) fn report_failure(&mut self, session: &mut Session) {
        (self.on_packet_parsed)(&mut Reentry::new(session), ERROR_STREAM_INDEX);
    }

    /// One header step. Returns whether anything was consumed.
    fn select(&mut self, session: &mut Session) -> Result<bool> {
        let store = session.store()?;
        let eof = store.end_of_input();
        let buf = store.unconsumed(&session.arena);

        if self.reader.is_none() {
            let Some(kind) = session.engine.detect(buf, eof)? else {
                return Ok(false);
            };
            self.reader = Some(session.engine.open_reader(kind));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };

        match reader.read_header(buf, eof)? {
            Step::Item {
                item: streams,
                consumed,
            } => {
                consume(session, consumed)?;
                debug!(
                    "{} selected {} streams: {:?}",
                    reader.format_name(),
                    streams.len(),
                    streams.iter().map(|s| s.kind).collect::<Vec<_>>()
                );
                session.select_streams(streams);
                (self.on_stream_selected)(&mut Reentry::new(session));
                Ok(true)
            }
            Step::Skip(n) => {
                consume(session, n)?;
                Ok(true)
            }
            Step::NeedMore if eof => Err(Error::malformed(
                "input ends inside the container header",
            )),
            Step::NeedMore => Ok(false),
            Step::End => Err(Error::malformed("container declares no streams")),
        }
    }

    /// One payload step. Returns whether anything was consumed.
    fn parse_packet(&mut self, session: &mut Session) -> Result<bool> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };
        let store = session.store()?;
        let eof = store.end_of_input();
        let buf = store.unconsumed(&session.arena);

        match reader.next_packet(buf, eof)? {
            Step::Item {
                item: packet,
                consumed,
            } => {
                consume(session, consumed)?;
                let stream_index = packet.stream_index;
                trace!(
                    "packet {} on stream {stream_index}: {} bytes at pts {}",
                    self.packets,
                    packet.len(),
                    packet.pts
                );
                session.queue_packet(packet);
                self.packets += 1;
                (self.on_packet_parsed)(&mut Reentry::new(session), stream_index);
                Ok(true)
            }
            Step::Skip(n) => {
                consume(session, n)?;
                Ok(true)
            }
            Step::NeedMore if eof => {
                warn!(
                    "input ends inside a {} packet, {} bytes left unparsed",
                    reader.format_name(),
                    session.backlog()
                );
                self.finish(session);
                Ok(false)
            }
            Step::NeedMore => Ok(false),
            Step::End => {
                self.finish(session);
                Ok(false)
            }
        }
    }

    fn finish(&self, session: &mut Session) {
        debug!("demuxer finished after {} packets", self.packets);
        session.lifecycle.finish_demuxer();
    }
}

fn consume(session: &mut Session, n: usize) -> Result<()> {
    let Session { store, arena, .. } = session;
    let store = store.as_mut().ok_or(Error::SourceClosed)?;
    store.consume(arena, n);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Bridge, DemuxPhase, Purpose, Reentry};
    use ddbridge_core::status::ERROR_STREAM_INDEX;
    use ddbridge_core::{BridgeConfig, Error, MediaKind};
    use ddbridge_engine::synth::{self, AviOptions};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Everything the callbacks observed.
    #[derive(Debug, Default)]
    struct Events {
        selected: usize,
        packets: Vec<u32>,
    }

    fn recording(
        events: &Rc<RefCell<Events>>,
    ) -> (
        impl FnMut(&mut Reentry<'_>) + 'static,
        impl FnMut(&mut Reentry<'_>, u32) + 'static,
    ) {
        let selected = Rc::clone(events);
        let parsed = Rc::clone(events);
        (
            move |_: &mut Reentry<'_>| selected.borrow_mut().selected += 1,
            move |_: &mut Reentry<'_>, index: u32| parsed.borrow_mut().packets.push(index),
        )
    }

    fn write(bridge: &mut Bridge, bytes: &[u8]) {
        let window = bridge.negotiate_capacity(Purpose::StoreWrite, bytes.len()).unwrap();
        bridge.window_mut(&window).unwrap().copy_from_slice(bytes);
        bridge.commit_write(Purpose::StoreWrite, bytes.len()).unwrap();
    }

    fn bulk_events(file: &[u8]) -> Events {
        let events = Rc::new(RefCell::new(Events::default()));
        let (on_selected, on_packet) = recording(&events);
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        write(&mut bridge, file);
        bridge.open_demuxer(on_selected, on_packet).unwrap();
        assert_eq!(bridge.demux_phase(), DemuxPhase::Finished);
        drop(bridge);
        Rc::try_unwrap(events).unwrap().into_inner()
    }

    fn streamed_events(file: &[u8], chunk: usize) -> Events {
        let events = Rc::new(RefCell::new(Events::default()));
        let (on_selected, on_packet) = recording(&events);
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        bridge.open_demuxer(on_selected, on_packet).unwrap();
        assert_eq!(bridge.demux_phase(), DemuxPhase::Selecting);
        for piece in file.chunks(chunk) {
            write(&mut bridge, piece);
        }
        bridge.signal_end_of_input().unwrap();
        assert_eq!(bridge.demux_phase(), DemuxPhase::Finished);
        drop(bridge);
        Rc::try_unwrap(events).unwrap().into_inner()
    }

    #[test]
    fn test_bulk_y4m_720p() {
        let events = bulk_events(&synth::y4m(1280, 720, 3));
        assert_eq!(events.selected, 1);
        assert_eq!(events.packets, vec![0, 0, 0]);
    }

    #[test]
    fn test_bulk_avi_container_order() {
        let file = synth::avi(&AviOptions {
            audio: Some((8000, 1)),
            rec_lists: true,
            junk: true,
            ..AviOptions::new(4, 2, 3)
        });
        let events = bulk_events(&file);
        assert_eq!(events.selected, 1);
        assert_eq!(events.packets, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_one_byte_streaming_matches_bulk() {
        let files = [
            synth::wav(8000, 2, 3000),
            synth::y4m(6, 4, 4),
            synth::avi(&AviOptions {
                audio: Some((8000, 2)),
                rec_lists: true,
                ..AviOptions::new(3, 3, 4)
            }),
        ];
        for file in &files {
            let bulk = bulk_events(file);
            let streamed = streamed_events(file, 1);
            assert_eq!(streamed.selected, 1);
            assert_eq!(streamed.packets.len(), bulk.packets.len());
            assert_eq!(streamed.packets, bulk.packets);
            assert!(!bulk.packets.is_empty());
        }
    }

    #[test]
    fn test_zero_byte_commit_is_malformed() {
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        bridge.negotiate_capacity(Purpose::StoreWrite, 16).unwrap();
        bridge.commit_write(Purpose::StoreWrite, 0).unwrap();
        let err = bridge.open_demuxer(|_| {}, |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        // The failed open leaves no demuxer behind.
        assert_eq!(bridge.demux_phase(), DemuxPhase::Closed);
    }

    #[test]
    fn test_truncated_header_is_malformed_in_bulk() {
        let file = synth::avi(&AviOptions::new(2, 2, 1));
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        write(&mut bridge, &file[..40]);
        let err = bridge.open_demuxer(|_| {}, |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_streaming_failure_reports_error_index() {
        let events = Rc::new(RefCell::new(Events::default()));
        let (on_selected, on_packet) = recording(&events);
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        bridge.open_demuxer(on_selected, on_packet).unwrap();

        write(&mut bridge, b"YUV4MPEG2 W2 H2 C420jpeg\n");
        write(&mut bridge, b"NOTAFRAME\n");
        assert_eq!(bridge.demux_phase(), DemuxPhase::Failed);
        assert!(matches!(bridge.demux_error(), Some(Error::MalformedInput(_))));
        assert_eq!(events.borrow().selected, 1);
        assert_eq!(events.borrow().packets, vec![ERROR_STREAM_INDEX]);

        // A failed demuxer ignores further input until it is closed.
        write(&mut bridge, b"FRAME\n");
        assert_eq!(events.borrow().packets.len(), 1);
        bridge.close_demuxer().unwrap();
        assert_eq!(bridge.demux_phase(), DemuxPhase::Closed);
    }

    #[test]
    fn test_close_demuxer_inside_callback_is_deferred() {
        let file = synth::y4m(2, 2, 5);
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        write(&mut bridge, &file);
        bridge
            .open_demuxer(
                |_| {},
                move |reentry, _| {
                    counter.set(counter.get() + 1);
                    if counter.get() == 2 {
                        reentry.close_demuxer().unwrap();
                        // Still open until this callback returns.
                        assert!(reentry.demux_phase().is_open());
                    }
                },
            )
            .unwrap();
        assert_eq!(seen.get(), 2);
        assert_eq!(bridge.demux_phase(), DemuxPhase::Closed);
        // The store outlives its demuxer and can feed a new one.
        assert!(bridge.store_len().unwrap() > 0);
    }

    #[test]
    fn test_stream_selected_opens_decoder_and_decodes() {
        let file = synth::avi(&AviOptions {
            audio: Some((8000, 1)),
            ..AviOptions::new(4, 4, 2)
        });
        let video = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&video);
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        write(&mut bridge, &file);
        bridge
            .open_demuxer(
                |reentry| {
                    assert_eq!(reentry.streams().len(), 2);
                    assert_eq!(reentry.stream(1).map(|s| s.kind), Some(MediaKind::Audio));
                    reentry.open_decoder().unwrap();
                },
                move |reentry, index| {
                    if index == 0 {
                        let sink = Rc::clone(&sink);
                        reentry
                            .decode(index, move |f| sink.borrow_mut().push(f.len()), |_| {})
                            .unwrap();
                    }
                },
            )
            .unwrap();
        // Bottom-up BGR24 4x4: 12-byte rows, already 4-byte aligned.
        assert_eq!(*video.borrow(), vec![48, 48]);
    }

    #[test]
    fn test_closed_store_is_source_closed() {
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.open_store().unwrap();
        write(&mut bridge, &synth::y4m(2, 2, 2));
        bridge
            .open_demuxer(|reentry| reentry.open_decoder().unwrap(), |_, _| {})
            .unwrap();
        bridge.close_store().unwrap();
        let err = bridge.decode(0, |_| {}, |_| {}).unwrap_err();
        assert!(matches!(err, Error::SourceClosed));

        // A new store does not revive the old selection.
        bridge.open_store().unwrap();
        let err = bridge.decode(0, |_| {}, |_| {}).unwrap_err();
        assert!(matches!(err, Error::SourceClosed));
    }
}
