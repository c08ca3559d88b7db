//! Secondary index: per-column value → base-RID set, rebuildable from the
//! page directory.
//!
//! Each column gets its own `BTreeMap<i64, BTreeSet<Rid>>` rather than a
//! hash map, so ranged lookups (`sum`, ranged `select`) can walk a key
//! range directly instead of scanning every row.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::StorageResult;
use crate::rid::Rid;
use crate::table::Table;

/// One ordered map per indexed column.
pub struct SecondaryIndex {
    columns: Vec<BTreeMap<i64, BTreeSet<Rid>>>,
}

impl SecondaryIndex {
    pub fn new(num_columns: usize) -> Self {
        SecondaryIndex {
            columns: (0..num_columns).map(|_| BTreeMap::new()).collect(),
        }
    }

    /// Scan the page directory, resolve each base row's live value for
    /// every indexed column, and repopulate the maps from scratch.
    /// Tombstoned base rows (RID cell already zeroed by a prior delete)
    /// are skipped rather than treated as an error.
    pub fn rebuild(&mut self, table: &Table) -> StorageResult<()> {
        for column in &mut self.columns {
            column.clear();
        }

        let base_rids: Vec<Rid> = table
            .directory_snapshot()
            .entries()
            .map(|(rid, _)| *rid)
            .filter(|rid| rid.is_base())
            .collect();

        for rid in base_rids {
            let projection = vec![true; self.columns.len()];
            let values = match table.read(rid, &projection) {
                Ok(values) => values,
                Err(_) => continue, // tombstoned or otherwise unreadable
            };

            for (col, value) in values.into_iter().enumerate() {
                if let Some(value) = value {
                    self.columns[col].entry(value).or_default().insert(rid);
                }
            }
        }

        Ok(())
    }

    /// Record a freshly inserted row.
    pub fn add(&mut self, rid: Rid, columns: &[i64]) {
        for (col, &value) in columns.iter().enumerate() {
            self.columns[col].entry(value).or_default().insert(rid);
        }
    }

    /// Move `rid` from `old` to `new` in `column`'s map, matching the
    /// Table Core's cumulative-update scheme (only touched columns move).
    pub fn update(&mut self, rid: Rid, old: i64, new: i64, column: usize) {
        if old == new {
            return;
        }
        if let Some(set) = self.columns[column].get_mut(&old) {
            set.remove(&rid);
            if set.is_empty() {
                self.columns[column].remove(&old);
            }
        }
        self.columns[column].entry(new).or_default().insert(rid);
    }

    /// Drop `rid` from every column's map, matching a base-row delete.
    pub fn remove(&mut self, rid: Rid, columns: &[i64]) {
        for (col, &value) in columns.iter().enumerate() {
            if let Some(set) = self.columns[col].get_mut(&value) {
                set.remove(&rid);
                if set.is_empty() {
                    self.columns[col].remove(&value);
                }
            }
        }
    }

    pub fn locate(&self, value: i64, column: usize) -> Vec<Rid> {
        self.columns[column]
            .get(&value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn locate_range(&self, start: i64, end: i64, column: usize) -> Vec<Rid> {
        self.columns[column]
            .range(start..=end)
            .flat_map(|(_, set)| set.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::disk::MemDisk;
    use std::sync::Arc;

    #[test]
    fn add_then_locate_finds_the_rid() {
        let mut index = SecondaryIndex::new(3);
        let rid = Rid::Base(1);
        index.add(rid, &[10, 20, 30]);
        assert_eq!(index.locate(20, 1), vec![rid]);
    }

    #[test]
    fn update_moves_the_rid_between_buckets() {
        let mut index = SecondaryIndex::new(1);
        let rid = Rid::Base(1);
        index.add(rid, &[10]);
        index.update(rid, 10, 11, 0);
        assert!(index.locate(10, 0).is_empty());
        assert_eq!(index.locate(11, 0), vec![rid]);
    }

    #[test]
    fn locate_range_collects_across_keys() {
        let mut index = SecondaryIndex::new(1);
        index.add(Rid::Base(1), &[5]);
        index.add(Rid::Base(2), &[7]);
        index.add(Rid::Base(3), &[9]);
        let mut found = index.locate_range(5, 7, 0);
        found.sort();
        assert_eq!(found, vec![Rid::Base(1), Rid::Base(2)]);
    }

    #[test]
    fn rebuild_skips_tombstoned_rows() {
        let config = Config::default();
        let table = Table::open("t", 2, 0, Arc::new(MemDisk::new()), config);
        let rid = table.insert(&[1, 100]).unwrap();
        table.insert(&[2, 200]).unwrap();
        table.delete(rid).unwrap();

        let mut index = SecondaryIndex::new(2);
        index.rebuild(&table).unwrap();
        assert!(index.locate(1, 0).is_empty());
        assert_eq!(index.locate(2, 0), vec![Rid::Base(2)]);
    }
}
