//! The input store: an append-only byte sequence inside the arena.
//!
//! Writes follow a two-phase discipline. `negotiate` reserves a window for
//! exactly one write and `commit` publishes some prefix of it. The demuxer
//! only ever sees the unconsumed tail, and the consumed prefix is reclaimed
//! lazily at the next negotiation.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::{Error, Result};
use tracing::trace;

use crate::arena::{Arena, Region};

/// What a write window is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Appending input bytes to the store.
    StoreWrite,
}

/// A negotiated write window.
///
/// Valid until the matching commit. Frame staging never moves the store
/// while a window is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteWindow {
    pub purpose: Purpose,
    /// Absolute offset into the arena.
    pub offset: usize,
    /// Exact number of bytes reserved.
    pub len: usize,
    /// Arena generation the window was issued under.
    pub generation: u64,
}

/// Bookkeeping for the logical byte sequence held in [`Region::Store`].
#[derive(Debug)]
pub struct Store {
    epoch: u64,
    /// Logical position of the first byte still held in the region.
    base: u64,
    /// Logical position of the demuxer's read cursor.
    consumed: u64,
    commits: u64,
    end_of_input: bool,
    pending: Option<WriteWindow>,
}

impl Store {
    /// Open a store for `epoch`, reserving its initial capacity.
    pub fn open(arena: &mut Arena, epoch: u64, initial_capacity: usize) -> Result<Self> {
        arena.reserve(Region::Store, initial_capacity)?;
        arena.set_len(Region::Store, 0);
        Ok(Self {
            epoch,
            base: 0,
            consumed: 0,
            commits: 0,
            end_of_input: false,
            pending: None,
        })
    }

    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Logical length: the sum of every committed length.
    pub fn len(&self, arena: &Arena) -> u64 {
        self.base + arena.len(Region::Store) as u64
    }

    pub fn is_empty(&self, arena: &Arena) -> bool {
        self.len(arena) == 0
    }

    pub const fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Committed bytes the demuxer has not consumed yet.
    pub fn backlog(&self, arena: &Arena) -> usize {
        (self.len(arena) - self.consumed) as usize
    }

    /// Number of commits so far, zero-length ones included.
    pub const fn commits(&self) -> u64 {
        self.commits
    }

    pub const fn end_of_input(&self) -> bool {
        self.end_of_input
    }

    pub const fn pending(&self) -> Option<WriteWindow> {
        self.pending
    }

    /// Reserve a window for the next `requested_len` bytes.
    pub fn negotiate(&mut self, arena: &mut Arena, requested_len: usize) -> Result<WriteWindow> {
        if self.pending.is_some() {
            return Err(Error::protocol(
                "a store write is already negotiated and not yet committed",
            ));
        }
        if self.end_of_input {
            return Err(Error::protocol("the store is sealed, no further writes"));
        }

        let reclaim = (self.consumed - self.base) as usize;
        if reclaim > 0 {
            arena.drain_front(Region::Store, reclaim);
            self.base += reclaim as u64;
            trace!("reclaimed {reclaim} consumed store bytes");
        }

        let live = arena.len(Region::Store);
        let needed = live.checked_add(requested_len).ok_or(Error::Capacity {
            requested: usize::MAX,
            limit: arena.limit(),
        })?;
        arena.reserve(Region::Store, needed)?;
        arena.set_reserved(Region::Store, requested_len);
        arena.pin(Region::Store);
        let window = WriteWindow {
            purpose: Purpose::StoreWrite,
            offset: arena.offset(Region::Store) + live,
            len: requested_len,
            generation: arena.bump_generation(),
        };
        self.pending = Some(window);
        Ok(window)
    }

    /// The bytes of a still-valid window.
    pub fn window_mut<'a>(
        &self,
        arena: &'a mut Arena,
        window: &WriteWindow,
    ) -> Result<&'a mut [u8]> {
        if self.pending.as_ref() != Some(window) {
            return Err(Error::protocol("write window is not the pending negotiation"));
        }
        if arena.generation() != window.generation {
            return Err(Error::protocol(format!(
                "stale write window (generation {} is now {})",
                window.generation,
                arena.generation()
            )));
        }
        Ok(arena.view_mut(window.offset, window.len))
    }

    /// Publish the first `len` bytes of the pending window.
    pub fn commit(&mut self, arena: &mut Arena, len: usize) -> Result<()> {
        let Some(window) = self.pending else {
            return Err(Error::protocol("commit without a negotiated window"));
        };
        if len > window.len {
            return Err(Error::protocol(format!(
                "commit of {len} bytes exceeds the negotiated {}",
                window.len
            )));
        }
        let live = arena.len(Region::Store);
        arena.set_reserved(Region::Store, 0);
        arena.set_len(Region::Store, live + len);
        arena.unpin();
        self.pending = None;
        self.commits += 1;
        trace!("committed {len} bytes, store length {}", self.len(arena));
        Ok(())
    }

    /// No more writes will follow.
    pub fn seal(&mut self) {
        self.end_of_input = true;
    }

    /// The unconsumed tail.
    pub fn unconsumed<'a>(&self, arena: &'a Arena) -> &'a [u8] {
        let start = (self.consumed - self.base) as usize;
        &arena.bytes(Region::Store)[start..]
    }

    /// Advance the read cursor.
    pub fn consume(&mut self, arena: &Arena, n: usize) {
        debug_assert!(n <= self.backlog(arena));
        self.consumed += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddbridge_core::MEMORY_PAGE;
    use proptest::prelude::*;

    fn setup() -> (Arena, Store) {
        let mut arena = Arena::new(64 * MEMORY_PAGE);
        let store = Store::open(&mut arena, 1, MEMORY_PAGE).unwrap();
        (arena, store)
    }

    fn append(store: &mut Store, arena: &mut Arena, bytes: &[u8]) {
        let window = store.negotiate(arena, bytes.len()).unwrap();
        store.window_mut(arena, &window).unwrap().copy_from_slice(bytes);
        store.commit(arena, bytes.len()).unwrap();
    }

    #[test]
    fn test_append_and_consume() {
        let (mut arena, mut store) = setup();
        append(&mut store, &mut arena, b"hello ");
        append(&mut store, &mut arena, b"world");
        assert_eq!(store.len(&arena), 11);
        assert_eq!(store.unconsumed(&arena), b"hello world");

        store.consume(&arena, 6);
        assert_eq!(store.unconsumed(&arena), b"world");
        assert_eq!(store.backlog(&arena), 5);
    }

    #[test]
    fn test_consumed_prefix_reclaimed_on_negotiate() {
        let (mut arena, mut store) = setup();
        append(&mut store, &mut arena, b"abcdef");
        store.consume(&arena, 4);
        append(&mut store, &mut arena, b"gh");
        assert_eq!(arena.bytes(Region::Store), b"efgh");
        assert_eq!(store.len(&arena), 8);
        assert_eq!(store.consumed(), 4);
        assert_eq!(store.unconsumed(&arena), b"efgh");
    }

    #[test]
    fn test_double_negotiate_is_protocol_violation() {
        let (mut arena, mut store) = setup();
        store.negotiate(&mut arena, 4).unwrap();
        assert!(matches!(
            store.negotiate(&mut arena, 4),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_commit_rules() {
        let (mut arena, mut store) = setup();
        assert!(matches!(
            store.commit(&mut arena, 0),
            Err(Error::ProtocolViolation(_))
        ));
        store.negotiate(&mut arena, 4).unwrap();
        assert!(matches!(
            store.commit(&mut arena, 5),
            Err(Error::ProtocolViolation(_))
        ));
        // A short commit is fine.
        store.commit(&mut arena, 2).unwrap();
        assert_eq!(store.len(&arena), 2);
        assert_eq!(store.commits(), 1);
    }

    #[test]
    fn test_window_stale_after_commit_and_renegotiation() {
        let (mut arena, mut store) = setup();
        let first = store.negotiate(&mut arena, 4).unwrap();
        store.commit(&mut arena, 4).unwrap();
        assert!(store.window_mut(&mut arena, &first).is_err());

        let second = store.negotiate(&mut arena, 4).unwrap();
        assert_ne!(first.generation, second.generation);
        assert!(store.window_mut(&mut arena, &first).is_err());
        assert!(store.window_mut(&mut arena, &second).is_ok());
    }

    #[test]
    fn test_window_stale_after_arena_move() {
        let (mut arena, mut store) = setup();
        let window = store.negotiate(&mut arena, 8).unwrap();
        store.window_mut(&mut arena, &window).unwrap().copy_from_slice(b"pending!");
        // Staging a frame is harmless; moving the store is not.
        arena.stage(Region::VideoFrame, &[0; 16]).unwrap();
        arena.reserve(Region::Store, 4 * MEMORY_PAGE).unwrap();
        assert!(matches!(
            store.window_mut(&mut arena, &window),
            Err(Error::ProtocolViolation(_))
        ));
        // Bytes written before the move still land on commit.
        store.commit(&mut arena, 8).unwrap();
        assert_eq!(store.unconsumed(&arena), b"pending!");
    }

    #[test]
    fn test_huge_negotiation_is_capacity_error() {
        let (mut arena, mut store) = setup();
        append(&mut store, &mut arena, b"abc");
        for len in [usize::MAX, usize::MAX - 1, 65 * MEMORY_PAGE] {
            let err = store.negotiate(&mut arena, len).unwrap_err();
            assert!(matches!(err, Error::Capacity { .. }), "{len}: {err}");
        }
        // Nothing is left pending.
        append(&mut store, &mut arena, b"d");
        assert_eq!(store.unconsumed(&arena), b"abcd");
    }

    #[test]
    fn test_frame_staging_keeps_pending_window() {
        let mut arena = Arena::new(4 * MEMORY_PAGE);
        let mut store = Store::open(&mut arena, 1, MEMORY_PAGE).unwrap();
        arena.reserve(Region::VideoFrame, MEMORY_PAGE).unwrap();
        // The store outgrows its first page and moves behind the video area.
        let window = store.negotiate(&mut arena, 2 * MEMORY_PAGE).unwrap();
        store.commit(&mut arena, 0).unwrap();
        assert_eq!(arena.offset(Region::Store), 2 * MEMORY_PAGE);

        let window_before = store.negotiate(&mut arena, 8).unwrap();
        assert_ne!(window.generation, window_before.generation);
        // Video staging would need the store to move, so it fails instead.
        let err = arena.stage(Region::VideoFrame, &vec![1; 2 * MEMORY_PAGE]).unwrap_err();
        assert!(matches!(err, Error::Capacity { .. }));
        // A frame that fits leaves the window usable.
        arena.stage(Region::VideoFrame, &[2; 16]).unwrap();
        store
            .window_mut(&mut arena, &window_before)
            .unwrap()
            .copy_from_slice(b"stillok!");
        store.commit(&mut arena, 8).unwrap();
        assert_eq!(store.unconsumed(&arena), b"stillok!");

        // Once committed the store may move again.
        arena.stage(Region::VideoFrame, &vec![3; 2 * MEMORY_PAGE]).unwrap();
        assert_eq!(arena.bytes(Region::Store), b"stillok!");
    }

    #[test]
    fn test_sealed_store_rejects_writes() {
        let (mut arena, mut store) = setup();
        store.seal();
        assert!(matches!(
            store.negotiate(&mut arena, 1),
            Err(Error::ProtocolViolation(_))
        ));
    }

    proptest! {
        #[test]
        fn test_store_length_is_sum_of_commits(
            writes in proptest::collection::vec(
                (proptest::collection::vec(any::<u8>(), 0..300), 0usize..300),
                1..40,
            )
        ) {
            let mut arena = Arena::new(64 * MEMORY_PAGE);
            let mut store = Store::open(&mut arena, 1, 128).unwrap();
            let mut expected = Vec::new();
            for (bytes, extra) in &writes {
                // Negotiate more than is written, then commit only what was written.
                let window = store.negotiate(&mut arena, bytes.len() + extra).unwrap();
                store.window_mut(&mut arena, &window).unwrap()[..bytes.len()]
                    .copy_from_slice(bytes);
                store.commit(&mut arena, bytes.len()).unwrap();
                expected.extend_from_slice(bytes);
            }
            prop_assert_eq!(store.len(&arena), expected.len() as u64);
            prop_assert_eq!(store.unconsumed(&arena), &expected[..]);
            prop_assert_eq!(store.commits(), writes.len() as u64);
        }
    }
}
