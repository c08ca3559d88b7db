//! Fixed-capacity buffer pool over `Range`s.
//!
//! A frame table tracks pin counts and access counts per slot; eviction
//! picks the minimum `access_count` among unpinned frames, ties broken by
//! lowest frame id, and writes the evicted range back to disk if dirty.
//!
//! Each frame stores `Arc<Mutex<Range>>` rather than a bare `Range`, so a
//! handle returned to a caller keeps working after the pool's own lock is
//! released, while the inner mutex still serializes concurrent column
//! writes to the same range.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::Config;
use crate::disk::Disk;
use crate::errors::StorageResult;
use crate::range::Range;

pub struct Frame {
    pub offset: i64,
    pub range: Arc<Mutex<Range>>,
    pin_count: usize,
    access_count: u64,
}

struct PoolState {
    frame_map: HashMap<i64, usize>,
    frames: Vec<Option<Frame>>,
    access_clock: u64,
}

impl PoolState {
    fn free_or_new_frame_id(&mut self, capacity: usize) -> Option<usize> {
        if let Some(id) = self.frames.iter().position(|f| f.is_none()) {
            return Some(id);
        }
        if self.frames.len() < capacity {
            self.frames.push(None);
            return Some(self.frames.len() - 1);
        }
        None
    }

    fn find_eviction_candidate(&self) -> Option<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(id, frame)| frame.as_ref().map(|f| (id, f)))
            .filter(|(_, f)| f.pin_count == 0)
            .min_by_key(|(id, f)| (f.access_count, *id))
            .map(|(id, _)| id)
    }
}

pub struct BufferPool {
    table: String,
    width: usize,
    disk: Arc<dyn Disk>,
    capacity: usize,
    page_entries: usize,
    state: Mutex<PoolState>,
    unpinned: Condvar,
}

impl BufferPool {
    pub fn new(table: impl Into<String>, width: usize, disk: Arc<dyn Disk>, config: &Config) -> Self {
        BufferPool {
            table: table.into(),
            width,
            disk,
            capacity: config.buffersize,
            page_entries: config.page_entries,
            state: Mutex::new(PoolState {
                frame_map: HashMap::new(),
                frames: Vec::new(),
                access_clock: 0,
            }),
            unpinned: Condvar::new(),
        }
    }

    /// Load a range from disk into a frame (or return the already
    /// resident one), pinning it on every call — per the Open Question
    /// resolution, `fetch_range` always re-pins and callers must pair it
    /// with exactly one `unpin_range`.
    pub fn fetch_range(&self, offset: i64) -> StorageResult<Arc<Mutex<Range>>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.frame_map.get(&offset) {
            state.access_clock += 1;
            let clock = state.access_clock;
            let frame = state.frames[frame_id].as_mut().unwrap();
            frame.pin_count += 1;
            frame.access_count = clock;
            return Ok(frame.range.clone());
        }

        let mut pages = Vec::with_capacity(self.width);
        for col in 0..self.width {
            pages.push(self.disk.fetch_page(&self.table, col, offset)?);
        }
        let range = Arc::new(Mutex::new(Range::from_pages(pages)));

        let frame_id = self.reserve_frame_slot(&mut state)?;
        state.access_clock += 1;
        let clock = state.access_clock;
        state.frames[frame_id] = Some(Frame {
            offset,
            range: range.clone(),
            pin_count: 1,
            access_count: clock,
        });
        state.frame_map.insert(offset, frame_id);

        Ok(range)
    }

    /// Allocate a brand-new, empty range at `offset` (no disk read).
    /// Access is bumped but pin is left at zero — the caller is
    /// responsible for pinning discipline thereafter.
    pub fn add_range(&self, offset: i64) -> StorageResult<Arc<Mutex<Range>>> {
        let mut state = self.state.lock();

        let range = Arc::new(Mutex::new(Range::new(self.width, self.page_entries)));
        let frame_id = self.reserve_frame_slot(&mut state)?;
        state.access_clock += 1;
        let clock = state.access_clock;
        state.frames[frame_id] = Some(Frame {
            offset,
            range: range.clone(),
            pin_count: 0,
            access_count: clock,
        });
        state.frame_map.insert(offset, frame_id);

        Ok(range)
    }

    pub fn unpin_range(&self, offset: i64) {
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.frame_map.get(&offset) {
            if let Some(frame) = state.frames[frame_id].as_mut() {
                frame.pin_count = frame.pin_count.saturating_sub(1);
            }
        }
        self.unpinned.notify_all();
    }

    pub fn is_pinned(&self, offset: i64) -> bool {
        self.get_pins(offset) > 0
    }

    pub fn get_pins(&self, offset: i64) -> usize {
        let state = self.state.lock();
        state
            .frame_map
            .get(&offset)
            .and_then(|&id| state.frames[id].as_ref())
            .map(|f| f.pin_count)
            .unwrap_or(0)
    }

    /// Block until the range at `offset` is unpinned. Used by the merge
    /// worker before swapping in a consolidated range, replacing the
    /// original's busy-wait spin with a condition variable notified on
    /// every `unpin_range`.
    pub fn wait_until_unpinned(&self, offset: i64) {
        let mut state = self.state.lock();
        loop {
            let pinned = state
                .frame_map
                .get(&offset)
                .and_then(|&id| state.frames[id].as_ref())
                .map(|f| f.pin_count > 0)
                .unwrap_or(false);

            if !pinned {
                return;
            }
            self.unpinned.wait(&mut state);
        }
    }

    /// Atomically replace the resident range at `offset` with a
    /// consolidated one, e.g. after a merge. The caller must have already
    /// confirmed the frame is unpinned (see `wait_until_unpinned`).
    pub fn swap_range(&self, offset: i64, consolidated: Range) {
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.frame_map.get(&offset) {
            if let Some(frame) = state.frames[frame_id].as_mut() {
                *frame.range.lock() = consolidated;
            }
        }
    }

    /// Flush every resident, dirty range back to disk. Used on clean
    /// shutdown.
    pub fn flush_all(&self) -> StorageResult<()> {
        let state = self.state.lock();
        for frame in state.frames.iter().flatten() {
            self.write_back(frame)?;
        }
        Ok(())
    }

    fn reserve_frame_slot(&self, state: &mut MutexGuard<'_, PoolState>) -> StorageResult<usize> {
        loop {
            if let Some(id) = state.free_or_new_frame_id(self.capacity) {
                return Ok(id);
            }

            match state.find_eviction_candidate() {
                Some(victim_id) => {
                    let victim = state.frames[victim_id].take().unwrap();
                    state.frame_map.remove(&victim.offset);
                    drop(victim.range.lock());
                    self.write_back(&victim)?;
                    return Ok(victim_id);
                }
                None => {
                    // Every resident frame is pinned; wait for an unpin
                    // rather than exposing eviction failure to the caller.
                    self.unpinned.wait(state);
                }
            }
        }
    }

    fn write_back(&self, frame: &Frame) -> StorageResult<()> {
        let range = frame.range.lock();
        for (col, page) in range.pages().iter().enumerate() {
            if page.is_dirty() {
                self.disk.write(&self.table, col, frame.offset, page)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;

    fn pool(capacity: usize) -> BufferPool {
        let mut config = Config::default();
        config.buffersize = capacity;
        config.page_entries = 8;
        BufferPool::new("t", 3, Arc::new(MemDisk::with_page_entries(8)), &config)
    }

    #[test]
    fn fetch_then_unpin_is_net_zero_on_pin_count() {
        let bp = pool(2);
        bp.fetch_range(0).unwrap();
        assert_eq!(bp.get_pins(0), 1);
        bp.unpin_range(0);
        assert_eq!(bp.get_pins(0), 0);
    }

    #[test]
    fn eviction_never_picks_a_pinned_frame() {
        let bp = pool(1);
        let _handle = bp.fetch_range(0).unwrap();
        // Frame 0 stays pinned; asking for a second offset must wait
        // rather than evict it. Unpin first so the test terminates.
        bp.unpin_range(0);
        bp.fetch_range(512).unwrap();
        assert!(!bp.is_pinned(0));
    }

    #[test]
    fn add_range_does_not_pin() {
        let bp = pool(2);
        bp.add_range(0).unwrap();
        assert_eq!(bp.get_pins(0), 0);
    }
}
