//! The shared arena.
//!
//! One flat, engine-owned byte region carrying every byte that crosses the
//! boundary: the input store and the frame staging areas. Regions grow by
//! whole pages. A region that cannot grow in place moves to the end of the
//! arena, and when that would break the size limit the arena compacts.
//! Moving live bytes bumps the generation, which invalidates outstanding
//! offsets. A pinned region is never moved to make room for another one.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use ddbridge_core::{Error, Result, MEMORY_PAGE};
use tracing::{debug, trace};

/// A named area of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Accumulated input bytes.
    Store,
    /// Staging for the video frame currently being delivered.
    VideoFrame,
    /// Staging for the audio frame currently being delivered.
    AudioFrame,
}

impl Region {
    pub const ALL: [Self; 3] = [Self::Store, Self::VideoFrame, Self::AudioFrame];

    const fn slot(self) -> usize {
        match self {
            Self::Store => 0,
            Self::VideoFrame => 1,
            Self::AudioFrame => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Span {
    offset: usize,
    capacity: usize,
    /// Live bytes at the front of the span.
    len: usize,
    /// Bytes after `len` promised to a pending write.
    reserved: usize,
}

impl Span {
    const fn end(&self) -> usize {
        self.offset + self.capacity
    }

    const fn keep(&self) -> usize {
        self.len + self.reserved
    }
}

/// Round up to whole pages.
const fn pages(bytes: usize) -> usize {
    bytes.div_ceil(MEMORY_PAGE).saturating_mul(MEMORY_PAGE)
}

/// Page-granular arena holding all boundary regions.
#[derive(Debug)]
pub struct Arena {
    memory: Vec<u8>,
    spans: [Span; 3],
    limit: usize,
    generation: u64,
    /// Region holding a write window that must stay put.
    pinned: Option<Region>,
}

impl Arena {
    /// Create an empty arena that never grows past `limit` bytes.
    pub const fn new(limit: usize) -> Self {
        Self {
            memory: Vec::new(),
            spans: [Span {
                offset: 0,
                capacity: 0,
                len: 0,
                reserved: 0,
            }; 3],
            limit,
            generation: 0,
            pinned: None,
        }
    }

    /// Bytes currently backed by memory.
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    pub const fn limit(&self) -> usize {
        self.limit
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidate every outstanding offset.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub const fn offset(&self, region: Region) -> usize {
        self.spans[region.slot()].offset
    }

    pub const fn capacity(&self, region: Region) -> usize {
        self.spans[region.slot()].capacity
    }

    pub const fn len(&self, region: Region) -> usize {
        self.spans[region.slot()].len
    }

    /// Live bytes of a region.
    pub fn bytes(&self, region: Region) -> &[u8] {
        let span = &self.spans[region.slot()];
        &self.memory[span.offset..span.offset + span.len]
    }

    /// Bytes at an absolute position.
    pub fn view(&self, offset: usize, len: usize) -> &[u8] {
        &self.memory[offset..offset + len]
    }

    /// Mutable bytes at an absolute position.
    pub fn view_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.memory[offset..offset + len]
    }

    /// Keep `region` in place while other regions grow.
    pub fn pin(&mut self, region: Region) {
        self.pinned = Some(region);
    }

    pub fn unpin(&mut self) {
        self.pinned = None;
    }

    pub fn set_len(&mut self, region: Region, len: usize) {
        let span = &mut self.spans[region.slot()];
        debug_assert!(len <= span.capacity);
        span.len = len;
    }

    /// Protect `reserved` bytes after the live data across moves.
    pub fn set_reserved(&mut self, region: Region, reserved: usize) {
        self.spans[region.slot()].reserved = reserved;
    }

    fn high_water(&self) -> usize {
        self.spans
            .iter()
            .filter(|s| s.capacity > 0)
            .map(Span::end)
            .max()
            .unwrap_or(0)
    }

    fn ensure_memory(&mut self, end: usize) -> Result<()> {
        if end > self.memory.len() {
            self.memory
                .try_reserve(end - self.memory.len())
                .map_err(|_| Error::Capacity {
                    requested: end,
                    limit: self.limit,
                })?;
            self.memory.resize(end, 0);
        }
        Ok(())
    }

    /// Make sure `region` can hold `needed` bytes, keeping its live and
    /// reserved bytes.
    pub fn reserve(&mut self, region: Region, needed: usize) -> Result<()> {
        let span = self.spans[region.slot()];
        if span.capacity >= needed {
            return Ok(());
        }
        if needed > self.limit {
            return Err(Error::Capacity {
                requested: needed,
                limit: self.limit,
            });
        }

        let candidates = [
            span.capacity.saturating_mul(2).max(pages(needed)),
            pages(needed),
            needed,
        ];
        let high = self.high_water();
        let fits = |start: usize, capacity: usize| {
            start
                .checked_add(capacity)
                .is_some_and(|end| end <= self.limit)
        };

        if span.capacity == 0 || span.end() == high {
            // Last region (or a new one): grow in place.
            let offset = if span.capacity == 0 { high } else { span.offset };
            if let Some(&capacity) = candidates.iter().find(|&&c| fits(offset, c)) {
                self.ensure_memory(offset + capacity)?;
                let span = &mut self.spans[region.slot()];
                span.offset = offset;
                span.capacity = capacity;
                trace!("{region:?} grown in place to {capacity} bytes at {offset}");
                return Ok(());
            }
        } else if let Some(&capacity) = candidates.iter().find(|&&c| fits(high, c)) {
            self.ensure_memory(high + capacity)?;
            let keep = span.keep();
            self.memory
                .copy_within(span.offset..span.offset + keep, high);
            let span = &mut self.spans[region.slot()];
            span.offset = high;
            span.capacity = capacity;
            if keep > 0 {
                self.bump_generation();
            }
            debug!("{region:?} relocated to {high} with {capacity} bytes");
            return Ok(());
        }

        self.compact(region, needed)
    }

    /// Repack every region tightly, leaving `target` last with room for `needed`.
    fn compact(&mut self, target: Region, needed: usize) -> Result<()> {
        let others: usize = Region::ALL
            .iter()
            .filter(|&&r| r != target)
            .map(|r| self.spans[r.slot()].keep())
            .sum();
        let target_span = self.spans[target.slot()];
        let capacity = [pages(needed), needed]
            .into_iter()
            .find(|&c| others.checked_add(c).is_some_and(|total| total <= self.limit))
            .ok_or(Error::Capacity {
                requested: others.saturating_add(needed),
                limit: self.limit,
            })?;
        let total = others + capacity;

        let order = Region::ALL
            .into_iter()
            .filter(|&r| r != target)
            .chain(std::iter::once(target));
        let mut spans = self.spans;
        let mut offset = 0;
        for region in order.clone() {
            let span = &mut spans[region.slot()];
            span.offset = offset;
            span.capacity = if region == target { capacity } else { span.keep() };
            offset += span.capacity;
        }
        if let Some(pinned) = self.pinned.filter(|&r| r != target) {
            if spans[pinned.slot()].offset != self.spans[pinned.slot()].offset {
                debug!("{target:?} needs {needed} bytes but {pinned:?} is pinned");
                return Err(Error::Capacity {
                    requested: others + needed,
                    limit: self.limit,
                });
            }
        }

        let mut packed = Vec::new();
        packed.try_reserve_exact(total).map_err(|_| Error::Capacity {
            requested: total,
            limit: self.limit,
        })?;
        let mut moved_live_bytes = false;
        for region in order {
            let (old, new) = (self.spans[region.slot()], spans[region.slot()]);
            moved_live_bytes |= old.keep() > 0 && old.offset != new.offset;
            packed.extend_from_slice(&self.memory[old.offset..old.offset + old.keep()]);
            packed.resize(new.offset + new.capacity, 0);
        }

        debug!(
            "arena compacted: {} -> {total} bytes, {target:?} now {capacity} bytes (was {})",
            self.memory.len(),
            target_span.capacity
        );
        self.memory = packed;
        self.spans = spans;
        if moved_live_bytes {
            self.bump_generation();
        }
        Ok(())
    }

    /// Drop the first `n` live bytes of a region, shifting the rest down.
    pub fn drain_front(&mut self, region: Region, n: usize) {
        let span = self.spans[region.slot()];
        let n = n.min(span.len);
        if n == 0 {
            return;
        }
        self.memory
            .copy_within(span.offset + n..span.offset + span.keep(), span.offset);
        self.spans[region.slot()].len -= n;
    }

    /// Copy `data` into a staging region, returning its absolute offset.
    pub fn stage(&mut self, region: Region, data: &[u8]) -> Result<usize> {
        self.reserve(region, data.len())?;
        let span = &mut self.spans[region.slot()];
        span.len = data.len();
        let offset = span.offset;
        self.memory[offset..offset + data.len()].copy_from_slice(data);
        Ok(offset)
    }

    /// Forget the live bytes of a region but keep its capacity.
    pub fn clear(&mut self, region: Region) {
        let span = &mut self.spans[region.slot()];
        span.len = 0;
        span.reserved = 0;
    }

    /// Give a region's space back.
    pub fn release(&mut self, region: Region) {
        self.spans[region.slot()] = Span::default();
        if self.pinned == Some(region) {
            self.pinned = None;
        }
        let high = self.high_water();
        self.memory.truncate(high);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = MEMORY_PAGE;

    #[test]
    fn test_first_reserve_rounds_to_pages() {
        let mut arena = Arena::new(16 * PAGE);
        arena.reserve(Region::Store, 10).unwrap();
        assert_eq!(arena.capacity(Region::Store), PAGE);
        assert_eq!(arena.offset(Region::Store), 0);
        assert_eq!(arena.size(), PAGE);
    }

    #[test]
    fn test_last_region_grows_in_place() {
        let mut arena = Arena::new(16 * PAGE);
        arena.reserve(Region::Store, PAGE).unwrap();
        let generation = arena.generation();
        arena.reserve(Region::Store, PAGE + 1).unwrap();
        // Doubling beats the two pages actually needed.
        assert_eq!(arena.capacity(Region::Store), 2 * PAGE);
        assert_eq!(arena.offset(Region::Store), 0);
        assert_eq!(arena.generation(), generation);
    }

    #[test]
    fn test_relocation_keeps_live_bytes() {
        let mut arena = Arena::new(16 * PAGE);
        arena.reserve(Region::Store, 4).unwrap();
        arena.view_mut(0, 4).copy_from_slice(b"abcd");
        arena.set_len(Region::Store, 4);
        arena.stage(Region::VideoFrame, &[9; 16]).unwrap();

        let generation = arena.generation();
        arena.reserve(Region::Store, 2 * PAGE).unwrap();
        assert_eq!(arena.offset(Region::Store), 2 * PAGE);
        assert_eq!(arena.bytes(Region::Store), b"abcd");
        assert!(arena.generation() > generation);
    }

    #[test]
    fn test_compaction_at_the_limit() {
        let mut arena = Arena::new(4 * PAGE);
        arena.reserve(Region::Store, PAGE).unwrap();
        arena.view_mut(0, 3).copy_from_slice(b"xyz");
        arena.set_len(Region::Store, 3);
        arena.reserve(Region::VideoFrame, PAGE).unwrap();
        // Store moves behind the video staging area.
        arena.reserve(Region::Store, 2 * PAGE).unwrap();
        assert_eq!(arena.offset(Region::Store), 2 * PAGE);

        // Video cannot grow in place or move to the end, so everything packs.
        arena.reserve(Region::VideoFrame, 2 * PAGE).unwrap();
        assert_eq!(arena.offset(Region::Store), 0);
        assert_eq!(arena.bytes(Region::Store), b"xyz");
        assert_eq!(arena.offset(Region::VideoFrame), 3);
        assert!(arena.size() <= arena.limit());
    }

    #[test]
    fn test_reserved_bytes_survive_moves() {
        let mut arena = Arena::new(16 * PAGE);
        arena.reserve(Region::Store, 8).unwrap();
        arena.view_mut(0, 8).copy_from_slice(b"12345678");
        arena.set_len(Region::Store, 4);
        arena.set_reserved(Region::Store, 4);
        arena.reserve(Region::AudioFrame, 1).unwrap();
        arena.reserve(Region::Store, 3 * PAGE).unwrap();
        let offset = arena.offset(Region::Store);
        assert_eq!(arena.view(offset, 8), b"12345678");
    }

    #[test]
    fn test_capacity_error() {
        let mut arena = Arena::new(2 * PAGE);
        arena.reserve(Region::Store, PAGE).unwrap();
        let err = arena.reserve(Region::Store, 3 * PAGE).unwrap_err();
        assert!(matches!(err, Error::Capacity { limit, .. } if limit == 2 * PAGE));
        // The failed request leaves the region untouched.
        assert_eq!(arena.capacity(Region::Store), PAGE);
    }

    #[test]
    fn test_limit_not_page_aligned() {
        let mut arena = Arena::new(PAGE + 100);
        arena.reserve(Region::Store, PAGE + 50).unwrap();
        assert_eq!(arena.capacity(Region::Store), PAGE + 50);
    }

    #[test]
    fn test_drain_front() {
        let mut arena = Arena::new(4 * PAGE);
        arena.reserve(Region::Store, 6).unwrap();
        arena.view_mut(0, 6).copy_from_slice(b"abcdef");
        arena.set_len(Region::Store, 6);
        arena.drain_front(Region::Store, 4);
        assert_eq!(arena.bytes(Region::Store), b"ef");
    }

    #[test]
    fn test_stage_and_release() {
        let mut arena = Arena::new(4 * PAGE);
        let offset = arena.stage(Region::AudioFrame, b"frame").unwrap();
        assert_eq!(arena.view(offset, 5), b"frame");
        arena.clear(Region::AudioFrame);
        assert_eq!(arena.len(Region::AudioFrame), 0);
        arena.release(Region::AudioFrame);
        assert_eq!(arena.size(), 0);
    }
}
