//! Open/close ordering across the store, demuxer and decoder handles.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::{Error, Handle, Result};
use tracing::debug;

/// Phase of the demuxer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemuxPhase {
    #[default]
    Closed,
    /// Scanning headers, streams not known yet.
    Selecting,
    /// Streams selected, emitting packets.
    Running,
    /// All input parsed.
    Finished,
    /// Stopped on an error; stays open until closed.
    Failed,
}

impl DemuxPhase {
    /// Whether the handle is open, whatever its progress.
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Whether the demuxer still wants input.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Selecting | Self::Running)
    }
}

/// Handle states and the store epochs they are bound to.
#[derive(Debug, Default)]
pub struct Lifecycle {
    store_open: bool,
    /// Bumped on every store open.
    store_epoch: u64,
    demux: DemuxPhase,
    demux_epoch: u64,
    /// Epoch of the store the current stream selection came from.
    selected_epoch: Option<u64>,
    decoder_open: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn store_open(&self) -> bool {
        self.store_open
    }

    pub const fn store_epoch(&self) -> u64 {
        self.store_epoch
    }

    pub const fn demux_phase(&self) -> DemuxPhase {
        self.demux
    }

    pub const fn decoder_open(&self) -> bool {
        self.decoder_open
    }

    /// Returns the new store epoch.
    pub fn open_store(&mut self) -> Result<u64> {
        if self.store_open {
            return Err(Error::AlreadyOpen(Handle::Store));
        }
        self.store_open = true;
        self.store_epoch += 1;
        debug!("store opened (epoch {})", self.store_epoch);
        Ok(self.store_epoch)
    }

    pub fn close_store(&mut self) -> Result<()> {
        if !self.store_open {
            return Err(Error::NotOpen(Handle::Store));
        }
        self.store_open = false;
        if self.demux.is_open() || self.decoder_open {
            debug!(
                "store closed under an open {}",
                if self.demux.is_open() { "demuxer" } else { "decoder" }
            );
        } else {
            debug!("store closed");
        }
        Ok(())
    }

    pub fn require_store(&self) -> Result<()> {
        if self.store_open {
            Ok(())
        } else {
            Err(Error::NotOpen(Handle::Store))
        }
    }

    /// Returns the store epoch the demuxer is bound to.
    pub fn open_demuxer(&mut self) -> Result<u64> {
        self.require_store()?;
        if self.demux.is_open() {
            return Err(Error::AlreadyOpen(Handle::Demuxer));
        }
        self.demux = DemuxPhase::Selecting;
        self.demux_epoch = self.store_epoch;
        debug!("demuxer opened on store epoch {}", self.demux_epoch);
        Ok(self.demux_epoch)
    }

    pub fn close_demuxer(&mut self) -> Result<()> {
        if !self.demux.is_open() {
            return Err(Error::NotOpen(Handle::Demuxer));
        }
        self.reset_demuxer();
        Ok(())
    }

    /// Close the demuxer if it is open.
    pub fn reset_demuxer(&mut self) {
        if self.demux.is_open() {
            debug!("demuxer closed from {:?}", self.demux);
            self.demux = DemuxPhase::Closed;
        }
    }

    /// Streams of the demuxer's store are known.
    pub fn select_streams(&mut self) {
        self.demux = DemuxPhase::Running;
        self.selected_epoch = Some(self.demux_epoch);
    }

    pub fn finish_demuxer(&mut self) {
        if self.demux.is_open() {
            self.demux = DemuxPhase::Finished;
        }
    }

    pub fn fail_demuxer(&mut self) {
        if self.demux.is_open() {
            self.demux = DemuxPhase::Failed;
        }
    }

    pub fn open_decoder(&mut self) -> Result<()> {
        if self.decoder_open {
            return Err(Error::AlreadyOpen(Handle::Decoder));
        }
        if self.selected_epoch.is_none() {
            return Err(Error::StreamsNotSelected);
        }
        self.decoder_open = true;
        debug!("decoder opened");
        Ok(())
    }

    pub fn close_decoder(&mut self) -> Result<()> {
        self.require_decoder()?;
        self.decoder_open = false;
        debug!("decoder closed");
        Ok(())
    }

    pub fn require_decoder(&self) -> Result<()> {
        if self.decoder_open {
            Ok(())
        } else {
            Err(Error::NotOpen(Handle::Decoder))
        }
    }

    /// Fails with `SourceClosed` unless the store of `epoch` is still open.
    pub fn check_source(&self, epoch: u64) -> Result<()> {
        if self.store_open && self.store_epoch == epoch {
            Ok(())
        } else {
            Err(Error::SourceClosed)
        }
    }

    /// Fails with `SourceClosed` unless the selected streams' store is still open.
    pub fn check_selection_source(&self) -> Result<()> {
        match self.selected_epoch {
            Some(epoch) => self.check_source(epoch),
            None => Err(Error::StreamsNotSelected),
        }
    }
}
