//! A page range: one `Page` per column, metadata columns first.
//!
//! Base ranges and tail ranges share this exact same layout; only the
//! directory and the RID allocator distinguish which offsets are which.

use crate::config::{BASE_RID_COL, INDIRECTION_COL, RID_COL};
use crate::errors::StorageResult;

#[derive(Debug, Clone)]
pub struct Range {
    pages: Vec<crate::page::Page>,
}

impl Range {
    pub fn new(width: usize, page_entries: usize) -> Self {
        Range {
            pages: (0..width).map(|_| crate::page::Page::new(page_entries)).collect(),
        }
    }

    pub fn from_pages(pages: Vec<crate::page::Page>) -> Self {
        Range { pages }
    }

    pub fn width(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, col: usize) -> &crate::page::Page {
        &self.pages[col]
    }

    pub fn page_mut(&mut self, col: usize) -> &mut crate::page::Page {
        &mut self.pages[col]
    }

    pub fn pages(&self) -> &[crate::page::Page] {
        &self.pages
    }

    /// Every column page in a range fills in lockstep, so checking column 0
    /// is sufficient to know whether the whole range still has room.
    pub fn has_capacity(&self) -> bool {
        self.pages[0].has_capacity()
    }

    /// Write one value into every column in lockstep; all columns
    /// started with equal `num_records` so they advance together and
    /// return the same slot.
    pub fn write_row(&mut self, values: &[i64]) -> StorageResult<usize> {
        let mut slot = 0;
        for (page, value) in self.pages.iter_mut().zip(values.iter()) {
            slot = page.write(*value)?;
        }
        Ok(slot)
    }

    pub fn read_row(&self, slot: usize, projection: &[bool]) -> StorageResult<Vec<Option<i64>>> {
        let mut result = Vec::with_capacity(projection.len());
        for (col, &wanted) in projection.iter().enumerate() {
            if wanted {
                result.push(Some(self.pages[col].read(slot)?));
            } else {
                result.push(None);
            }
        }
        Ok(result)
    }

    pub fn indirection(&self, slot: usize) -> StorageResult<i64> {
        self.pages[INDIRECTION_COL].read(slot)
    }

    pub fn set_indirection(&mut self, slot: usize, value: i64) -> StorageResult<()> {
        self.pages[INDIRECTION_COL].inplace_update(slot, value)
    }

    pub fn rid_cell(&self, slot: usize) -> StorageResult<i64> {
        self.pages[RID_COL].read(slot)
    }

    pub fn set_rid_cell(&mut self, slot: usize, value: i64) -> StorageResult<()> {
        self.pages[RID_COL].inplace_update(slot, value)
    }

    pub fn base_rid_cell(&self, slot: usize) -> StorageResult<i64> {
        self.pages[BASE_RID_COL].read(slot)
    }

    /// Number of written slots; every column page in a range advances in
    /// lockstep so any column's count is representative.
    pub fn num_records(&self) -> usize {
        self.pages[0].num_records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_row_advances_all_columns_in_lockstep() {
        let mut range = Range::new(6, 8);
        let slot = range.write_row(&[0, 1, 100, 0, 10, 20]).unwrap();
        assert_eq!(slot, 1);
        assert_eq!(range.page(4).read(1).unwrap(), 10);
        assert_eq!(range.page(5).read(1).unwrap(), 20);
    }

    #[test]
    fn indirection_round_trips() {
        let mut range = Range::new(6, 8);
        range.write_row(&[0, 1, 100, 0, 10, 20]).unwrap();
        range.set_indirection(1, 5).unwrap();
        assert_eq!(range.indirection(1).unwrap(), 5);
    }
}
