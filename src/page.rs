//! Fixed-size column page.
//!
//! Cells are typed `i64` from the start, so writing a non-integer value
//! can't arise here — the type system closes that error class rather than
//! checking it at runtime. Byte encoding only happens at the `Disk`
//! boundary, which is the layer that actually has to round-trip bytes.

use crate::errors::{StorageError, StorageResult};

/// Slot 0 is reserved for the page's TPS and is never handed back as a
/// record slot.
const TPS_SLOT: usize = 0;

#[derive(Debug, Clone)]
pub struct Page {
    cells: Vec<i64>,
    num_records: usize,
    dirty: bool,
    page_entries: usize,
}

impl Page {
    pub fn new(page_entries: usize) -> Self {
        Page {
            cells: vec![0; page_entries],
            num_records: 1,
            dirty: false,
            page_entries,
        }
    }

    /// Reconstruct a page from persisted cells and record count (used when
    /// loading from `Disk`).
    pub fn from_parts(cells: Vec<i64>, num_records: usize) -> Self {
        let page_entries = cells.len();
        Page {
            cells,
            num_records,
            dirty: false,
            page_entries,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.num_records < self.page_entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn cells(&self) -> &[i64] {
        &self.cells
    }

    /// Write the next value into this page, returning the slot used.
    pub fn write(&mut self, value: i64) -> StorageResult<usize> {
        if !self.has_capacity() {
            return Err(StorageError::PageFull);
        }

        let slot = self.num_records;
        self.cells[slot] = value;
        self.num_records += 1;
        self.dirty = true;
        Ok(slot)
    }

    pub fn read(&self, slot: usize) -> StorageResult<i64> {
        self.cells
            .get(slot)
            .copied()
            .ok_or(StorageError::OffsetOutOfBounds)
    }

    /// Overwrite an already-written slot in place. Used only for
    /// INDIRECTION and RID cells during update/delete/rollback.
    pub fn inplace_update(&mut self, slot: usize, value: i64) -> StorageResult<()> {
        if slot >= self.cells.len() {
            return Err(StorageError::OffsetOutOfBounds);
        }
        self.cells[slot] = value;
        self.dirty = true;
        Ok(())
    }

    pub fn get_tps(&self) -> i64 {
        self.cells[TPS_SLOT]
    }

    pub fn update_tps(&mut self, value: i64) {
        self.cells[TPS_SLOT] = value;
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_advances_num_records_and_returns_slot() {
        let mut page = Page::new(4);
        assert_eq!(page.write(7).unwrap(), 1);
        assert_eq!(page.write(8).unwrap(), 2);
        assert_eq!(page.read(1).unwrap(), 7);
        assert_eq!(page.read(2).unwrap(), 8);
    }

    #[test]
    fn write_fails_once_full() {
        let mut page = Page::new(2);
        page.write(1).unwrap();
        assert!(matches!(page.write(2), Err(StorageError::PageFull)));
    }

    #[test]
    fn inplace_update_does_not_advance_num_records() {
        let mut page = Page::new(4);
        page.write(1).unwrap();
        page.inplace_update(1, 99).unwrap();
        assert_eq!(page.read(1).unwrap(), 99);
        assert_eq!(page.num_records(), 2);
    }

    #[test]
    fn tps_round_trips_through_slot_zero() {
        let mut page = Page::new(4);
        page.update_tps(42);
        assert_eq!(page.get_tps(), 42);
    }
}
