//! Thin query dispatcher over the Table Core and its Secondary Index.
//!
//! Locates records by primary key through the index, acquires the
//! appropriate lock before touching the Core, and reports success as a
//! plain boolean rather than propagating a `StorageError` for ordinary
//! lock conflicts or missing keys — those are expected, recoverable
//! outcomes a transaction may choose to retry or abort on.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::index::SecondaryIndex;
use crate::lock_manager::{LockManager, TxnId};
use crate::rid::Rid;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rid: Rid,
    pub key: i64,
    pub columns: Vec<Option<i64>>,
}

pub struct Query {
    table: Arc<Table>,
    key_column: usize,
    index: Mutex<SecondaryIndex>,
}

impl Query {
    pub fn new(table: Arc<Table>, key_column: usize) -> Self {
        let mut index = SecondaryIndex::new(table.num_columns);
        index.rebuild(&table).ok();
        Query {
            table,
            key_column,
            index: Mutex::new(index),
        }
    }

    /// Returns every base RID currently indexed under `key_value`.
    fn locate_key(&self, key_value: i64) -> Vec<Rid> {
        self.index.lock().locate(key_value, self.key_column)
    }

    /// Resolve a primary-key value to its base RID, if present.
    pub fn locate(&self, key_value: i64) -> Option<Rid> {
        self.locate_key(key_value).into_iter().next()
    }

    /// The Table Core this dispatcher sits on top of, for callers that
    /// need lower-level introspection (e.g. observing merge completion
    /// via `Table::tps_for`).
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Roll back the most recent update installed on `base_rid`. Used by
    /// `Transaction::abort`. Does not repair the secondary index: an
    /// aborted update is rare enough that leaving the index briefly
    /// stale until the next `rebuild` is preferable to threading
    /// old/new column values through every abort path.
    pub fn undo(&self, base_rid: Rid) -> crate::errors::StorageResult<()> {
        self.table.undo_update(base_rid)
    }

    pub fn select(
        &self,
        key_value: i64,
        projection: &[bool],
        lock_manager: &LockManager,
        txn: TxnId,
    ) -> (bool, Vec<Record>) {
        let rids = self.locate_key(key_value);
        if rids.is_empty() {
            return (false, Vec::new());
        }

        let mut records = Vec::with_capacity(rids.len());
        for rid in rids {
            if !lock_manager.acquire_read(rid, txn) {
                return (false, Vec::new());
            }
            match self.table.read(rid, projection) {
                Ok(columns) => records.push(Record {
                    rid,
                    key: key_value,
                    columns,
                }),
                Err(_) => return (false, Vec::new()),
            }
        }
        (true, records)
    }

    pub fn insert(&self, columns: &[i64], lock_manager: &LockManager, txn: TxnId) -> (bool, Option<Rid>) {
        match self.table.insert(columns) {
            Ok(rid) => {
                lock_manager.acquire_write(rid, txn);
                self.index.lock().add(rid, columns);
                (true, Some(rid))
            }
            Err(err) => {
                debug!("insert failed: {err}");
                (false, None)
            }
        }
    }

    pub fn update(&self, key_value: i64, updates: &[Option<i64>], lock_manager: &LockManager, txn: TxnId) -> (bool, Option<Rid>) {
        let rids = self.locate_key(key_value);
        let Some(&base_rid) = rids.first() else {
            return (false, None);
        };

        if !lock_manager.acquire_write(base_rid, txn) {
            return (false, None);
        }

        let num_columns = self.table.num_columns;
        let old_values = match self.table.read(base_rid, &vec![true; num_columns]) {
            Ok(v) => v,
            Err(_) => return (false, None),
        };

        match self.table.update(base_rid, updates) {
            Ok(tail_rid) => {
                let mut index = self.index.lock();
                for (col, update) in updates.iter().enumerate() {
                    if let Some(new_value) = update {
                        if let Some(old_value) = old_values[col] {
                            index.update(base_rid, old_value, *new_value, col);
                        }
                    }
                }
                (true, Some(tail_rid))
            }
            Err(err) => {
                debug!("update failed: {err}");
                (false, None)
            }
        }
    }

    pub fn delete(&self, key_value: i64, lock_manager: &LockManager, txn: TxnId) -> (bool, Option<Rid>) {
        let rids = self.locate_key(key_value);
        let Some(&base_rid) = rids.first() else {
            return (false, None);
        };

        if !lock_manager.acquire_write(base_rid, txn) {
            return (false, None);
        }

        let num_columns = self.table.num_columns;
        let values = self.table.read(base_rid, &vec![true; num_columns]).ok();

        match self.table.delete(base_rid) {
            Ok(()) => {
                if let Some(values) = values {
                    let values: Vec<i64> = values.into_iter().map(|v| v.unwrap_or(0)).collect();
                    self.index.lock().remove(base_rid, &values);
                }
                (true, Some(base_rid))
            }
            Err(err) => {
                debug!("delete failed: {err}");
                (false, None)
            }
        }
    }

    /// Sum `column` across every record whose key lies in `[start, end]`.
    pub fn sum(&self, start: i64, end: i64, column: usize, lock_manager: &LockManager, txn: TxnId) -> (bool, i64) {
        let rids = self.index.lock().locate_range(start, end, self.key_column);
        if rids.is_empty() {
            return (false, 0);
        }

        let mut total = 0i64;
        let mut projection = vec![false; self.table.num_columns];
        projection[column] = true;

        for rid in rids {
            if !lock_manager.acquire_read(rid, txn) {
                return (false, 0);
            }
            match self.table.read(rid, &projection) {
                Ok(values) => total += values[column].unwrap_or(0),
                Err(_) => return (false, 0),
            }
        }
        (true, total)
    }

    /// Increment `column` by one for the record keyed by `key_value`.
    pub fn increment(&self, key_value: i64, column: usize, lock_manager: &LockManager, txn: TxnId) -> (bool, Option<Rid>) {
        let rids = self.locate_key(key_value);
        let Some(&rid) = rids.first() else {
            return (false, None);
        };

        // Acquire the write lock before the pre-read: the computed
        // `current_value + 1` must be read under the same protection
        // `update` writes it back under, or two concurrent increments on
        // the same key can both read the stale value and one update is
        // lost.
        if !lock_manager.acquire_write(rid, txn) {
            return (false, None);
        }

        let num_columns = self.table.num_columns;
        let current = match self.table.read(rid, &vec![true; num_columns]) {
            Ok(v) => v,
            Err(_) => return (false, None),
        };
        let Some(current_value) = current[column] else {
            return (false, None);
        };

        let mut updates = vec![None; num_columns];
        updates[column] = Some(current_value + 1);
        self.update(key_value, &updates, lock_manager, txn)
    }
}
