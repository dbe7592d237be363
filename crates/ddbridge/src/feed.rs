//! Engine-driven feeding.
//!
//! The engine decides how much it wants next. [`Bridge::preferred_write_len`]
//! reports that size, [`Bridge::write_with`] lets the host fill one window
//! through a closure, and [`Bridge::feed_from`] drives a whole
//! [`std::io::Read`] into the store chunk by chunk.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::io::{ErrorKind, Read};

use ddbridge_core::{Error, Result};
use tracing::{debug, trace};

use crate::bridge::Bridge;
use crate::lifecycle::DemuxPhase;
use crate::store::Purpose;

/// What one [`Bridge::feed_from`] call moved into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub bytes_written: u64,
    /// Committed windows, the final empty one included.
    pub writes: u64,
    /// The reader hit EOF and the store was sealed.
    pub reached_eof: bool,
}

impl Bridge {
    /// How many bytes the engine wants in the next write.
    ///
    /// Without a demuxer this is the pull chunk size. While a demuxer is
    /// consuming it shrinks with the unconsumed backlog, down to 0 once the
    /// backlog reaches `max_buffered_bytes`. A closed or sealed store, or a
    /// demuxer that stopped, wants nothing.
    pub fn preferred_write_len(&self) -> usize {
        let Some(store) = self.session.store.as_ref() else {
            return 0;
        };
        if store.end_of_input() {
            return 0;
        }
        let config = &self.session.config;
        match self.demux_phase() {
            DemuxPhase::Closed => config.pull_chunk_size,
            DemuxPhase::Selecting | DemuxPhase::Running => config
                .max_buffered_bytes
                .saturating_sub(self.session.backlog())
                .min(config.pull_chunk_size),
            DemuxPhase::Finished | DemuxPhase::Failed => 0,
        }
    }

    /// Negotiate `requested_len` bytes, let `fill` write into the window,
    /// and commit the length it reports.
    pub fn write_with<F>(&mut self, requested_len: usize, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let window = self.negotiate_capacity(Purpose::StoreWrite, requested_len)?;
        let written = fill(self.window_mut(&window)?);
        self.commit_write(Purpose::StoreWrite, written)?;
        Ok(written)
    }

    /// Pull `reader` into the store until EOF, sealing it at the end.
    ///
    /// Stops early, without sealing, once a streaming demuxer has finished or
    /// failed, or a callback closed the store.
    pub fn feed_from<R: Read>(&mut self, reader: &mut R) -> Result<FeedSummary> {
        self.session.lifecycle.require_store()?;
        let mut summary = FeedSummary::default();

        loop {
            if self.session.store.is_none() {
                debug!("store closed while feeding");
                break;
            }
            if matches!(
                self.demux_phase(),
                DemuxPhase::Finished | DemuxPhase::Failed
            ) {
                debug!("demuxer stopped, feeding ends");
                break;
            }
            if self.session.store()?.end_of_input() {
                summary.reached_eof = true;
                break;
            }

            let want = self.preferred_write_len();
            if want == 0 {
                let backlog = self.session.backlog();
                return Err(Error::Capacity {
                    requested: backlog + self.session.config.pull_chunk_size,
                    limit: self.session.config.max_buffered_bytes,
                });
            }

            let window = self.negotiate_capacity(Purpose::StoreWrite, want)?;
            let read = loop {
                match reader.read(self.window_mut(&window)?) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        self.commit_write(Purpose::StoreWrite, 0)?;
                        return Err(e.into());
                    }
                }
            };
            self.commit_write(Purpose::StoreWrite, read)?;
            summary.writes += 1;
            summary.bytes_written += read as u64;
            trace!("fed {read} of {want} bytes");

            if read == 0 {
                if self.session.store.is_some() {
                    self.signal_end_of_input()?;
                    summary.reached_eof = true;
                }
                break;
            }
        }

        debug!(
            "fed {} bytes in {} writes{}",
            summary.bytes_written,
            summary.writes,
            if summary.reached_eof { ", input ended" } else { "" }
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddbridge_core::{BridgeConfig, Handle, MEMORY_PAGE};
    use ddbridge_engine::synth;
    use std::cell::RefCell;
    use std::io::{self, Cursor};
    use std::rc::Rc;

    fn config(pull_chunk_size: usize, max_buffered_bytes: usize) -> BridgeConfig {
        BridgeConfig {
            pull_chunk_size,
            max_buffered_bytes,
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn test_preferred_write_len() {
        let mut bridge = Bridge::new(config(1000, 1004)).unwrap();
        assert_eq!(bridge.preferred_write_len(), 0);
        bridge.open_store().unwrap();
        // Preloading is not limited by the backlog.
        assert_eq!(bridge.preferred_write_len(), 1000);

        bridge.open_demuxer(|_| {}, |_, _| {}).unwrap();
        // A prefix the detector cannot decide on stays unconsumed.
        bridge
            .write_with(2000, |w| {
                w[..4].copy_from_slice(b"RIFF");
                4
            })
            .unwrap();
        assert_eq!(bridge.preferred_write_len(), 1000);
        bridge
            .write_with(4, |w| {
                w.copy_from_slice(&[0; 4]);
                4
            })
            .unwrap();
        assert_eq!(bridge.session.backlog(), 8);
        assert_eq!(bridge.preferred_write_len(), 996);

        // Eight bytes cannot hold a RIFF signature, so the demuxer fails.
        bridge.signal_end_of_input().unwrap();
        assert_eq!(bridge.demux_phase(), DemuxPhase::Failed);
        assert_eq!(bridge.preferred_write_len(), 0);
    }

    #[test]
    fn test_backlog_limit_is_capacity_error() {
        // A Y4M header line longer than the backlog limit can never be parsed.
        let mut header = b"YUV4MPEG2 W2 H2 C420jpeg X".to_vec();
        header.resize(600, b'x');
        let mut bridge = Bridge::new(config(64, 256)).unwrap();
        bridge.open_store().unwrap();
        bridge.open_demuxer(|_| {}, |_, _| {}).unwrap();
        let err = bridge.feed_from(&mut Cursor::new(header)).unwrap_err();
        assert!(matches!(err, Error::Capacity { limit: 256, .. }));
        assert_eq!(bridge.session.backlog(), 256);
    }

    #[test]
    fn test_feed_bulk_then_demux() {
        let file = synth::wav(8000, 1, 5000);
        let mut bridge = Bridge::new(config(MEMORY_PAGE, 8 * MEMORY_PAGE)).unwrap();
        bridge.open_store().unwrap();
        let summary = bridge.feed_from(&mut Cursor::new(file.clone())).unwrap();
        assert!(summary.reached_eof);
        assert_eq!(summary.bytes_written, file.len() as u64);
        // One window per page plus the empty read at EOF.
        assert_eq!(summary.writes, file.len().div_ceil(MEMORY_PAGE) as u64 + 1);

        let packets = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&packets);
        bridge
            .open_demuxer(|_| {}, move |_, _| *counter.borrow_mut() += 1)
            .unwrap();
        // 5000 frames in packets of 1024.
        assert_eq!(*packets.borrow(), 5);
        assert_eq!(bridge.demux_phase(), DemuxPhase::Finished);
    }

    #[test]
    fn test_feed_streaming() {
        let file = synth::y4m(16, 16, 6);
        let mut bridge = Bridge::new(config(100, 1000)).unwrap();
        bridge.open_store().unwrap();
        let frames = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&frames);
        bridge
            .open_demuxer(
                |reentry| reentry.open_decoder().unwrap(),
                move |reentry, index| {
                    let sink = Rc::clone(&sink);
                    reentry
                        .decode(index, move |f| sink.borrow_mut().push(f.pts), |_| {})
                        .unwrap();
                },
            )
            .unwrap();
        let summary = bridge.feed_from(&mut Cursor::new(file.clone())).unwrap();
        assert!(summary.reached_eof);
        assert_eq!(summary.bytes_written, file.len() as u64);
        assert_eq!(*frames.borrow(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(bridge.demux_phase(), DemuxPhase::Finished);
        assert_eq!(bridge.store_consumed().unwrap(), file.len() as u64);
    }

    struct Flaky {
        inner: Cursor<Vec<u8>>,
        interrupted: bool,
        fail_after: u64,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::new(ErrorKind::Interrupted, "signal"));
            }
            if self.inner.position() >= self.fail_after {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "gone"));
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_feed_retries_interrupts_and_reports_io_errors() {
        let mut bridge = Bridge::new(config(10, 1000)).unwrap();
        bridge.open_store().unwrap();
        let mut reader = Flaky {
            inner: Cursor::new(vec![7; 100]),
            interrupted: false,
            fail_after: 30,
        };
        let err = bridge.feed_from(&mut reader).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        // Everything read before the failure is kept, and no write is left pending.
        assert_eq!(bridge.store_len().unwrap(), 30);
        bridge.negotiate_capacity(Purpose::StoreWrite, 1).unwrap();
    }

    #[test]
    fn test_feed_requires_store() {
        let mut bridge = Bridge::new(BridgeConfig::default()).unwrap();
        let err = bridge.feed_from(&mut io::empty()).unwrap_err();
        assert!(matches!(err, Error::NotOpen(Handle::Store)));
    }
}
