//! Table Core: insert/read/update/delete against base+tail ranges,
//! indirection chains, and TPS-gated reads.
//!
//! Each range is one page per column. Inserts append to the current base
//! range (opening a new one when full), writes allocate a fresh tail
//! record and splice it onto the target row's indirection chain, and
//! reads follow that chain until they either reach the base row or cross
//! a TPS boundary the background merge has already folded in.
//!
//! The public API is exclusively RID-keyed: primary-key → RID resolution
//! is the `SecondaryIndex`/`Query` layer's job, not the Core's.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use parking_lot::Mutex;

use crate::bufferpool::BufferPool;
use crate::config::{Config, BASE_RID_COL, INDIRECTION_COL, RID_COL, TIMESTAMP_COL};
use crate::directory::Directory;
use crate::disk::Disk;
use crate::errors::StorageResult;
use crate::range::Range;
use crate::rid::Rid;

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct Table {
    pub name: String,
    pub num_columns: usize,
    pub key: usize,
    width: usize,
    config: Config,
    disk: Arc<dyn Disk>,
    buffer_pool: Arc<BufferPool>,
    directory: Arc<Mutex<Directory>>,
    merge_tx: mpsc::SyncSender<i64>,
}

impl Table {
    /// Create a fresh table and start its merge worker.
    pub fn open(name: impl Into<String>, num_columns: usize, key: usize, disk: Arc<dyn Disk>, config: Config) -> Arc<Table> {
        let name = name.into();
        let width = config.width(num_columns);
        let buffer_pool = Arc::new(BufferPool::new(name.clone(), width, disk.clone(), &config));
        let directory = Arc::new(Mutex::new(Directory::new(&config)));

        let (tx, rx) = mpsc::sync_channel(256);
        crate::merge::spawn_merge_worker(
            name.clone(),
            num_columns,
            config.clone(),
            buffer_pool.clone(),
            disk.clone(),
            directory.clone(),
            rx,
        );

        Arc::new(Table {
            name,
            num_columns,
            key,
            width,
            config,
            disk,
            buffer_pool,
            directory,
            merge_tx: tx,
        })
    }

    /// Reopen a table from a previously persisted `Directory` snapshot.
    pub fn reopen(
        name: impl Into<String>,
        num_columns: usize,
        key: usize,
        disk: Arc<dyn Disk>,
        config: Config,
        directory: Directory,
    ) -> Arc<Table> {
        let name = name.into();
        let width = config.width(num_columns);
        let buffer_pool = Arc::new(BufferPool::new(name.clone(), width, disk.clone(), &config));
        let directory = Arc::new(Mutex::new(directory));

        let (tx, rx) = mpsc::sync_channel(256);
        crate::merge::spawn_merge_worker(
            name.clone(),
            num_columns,
            config.clone(),
            buffer_pool.clone(),
            disk.clone(),
            directory.clone(),
            rx,
        );

        Arc::new(Table {
            name,
            num_columns,
            key,
            width,
            config,
            disk,
            buffer_pool,
            directory,
            merge_tx: tx,
        })
    }

    pub fn directory_snapshot(&self) -> Directory {
        self.directory.lock().clone()
    }

    /// Insert a new base record. `columns` must have `num_columns` entries.
    pub fn insert(&self, columns: &[i64]) -> StorageResult<Rid> {
        let mut dir = self.directory.lock();

        if dir.current_base_offset().is_none() {
            let offset = dir.allocate_range_offset(self.config.file_page_length, true);
            self.buffer_pool.add_range(offset)?;
            dir.set_current_base_offset(offset);
        }

        loop {
            let base_offset = dir.current_base_offset().unwrap();
            let range_arc = self.buffer_pool.fetch_range(base_offset)?;
            let has_capacity = range_arc.lock().has_capacity();

            if !has_capacity {
                self.buffer_pool.unpin_range(base_offset);
                let new_offset = dir.allocate_range_offset(self.config.file_page_length, true);
                self.buffer_pool.add_range(new_offset)?;
                dir.set_current_base_offset(new_offset);
                continue;
            }

            let rid = dir.next_base_rid();
            let mut row = vec![0i64; self.width];
            row[RID_COL] = rid.raw();
            row[BASE_RID_COL] = 0; // a base row has no base of its own
            for (i, &value) in columns.iter().enumerate() {
                row[self.config.offset + i] = value;
            }
            row[TIMESTAMP_COL] = now_ts();

            let slot = {
                let mut range = range_arc.lock();
                range.write_row(&row)?
            };
            self.buffer_pool.unpin_range(base_offset);
            dir.record(rid, base_offset, slot);

            debug!("inserted base rid {rid:?} at offset {base_offset} slot {slot}");
            return Ok(rid);
        }
    }

    /// Append a tail version with the cumulative update scheme: entries
    /// in `updates` that are `None` keep the record's current value.
    pub fn update(&self, base_rid: Rid, updates: &[Option<i64>]) -> StorageResult<Rid> {
        let mut dir = self.directory.lock();
        let (base_offset, base_slot) = dir.lookup(base_rid)?;

        let indirection_raw = {
            let range_arc = self.buffer_pool.fetch_range(base_offset)?;
            let v = range_arc.lock().indirection(base_slot)?;
            self.buffer_pool.unpin_range(base_offset);
            v
        };

        let mut cumulative = vec![0i64; self.num_columns];
        match Rid::from_raw(indirection_raw) {
            Some(current_head) => {
                let (head_offset, head_slot) = dir.lookup(current_head)?;
                let range_arc = self.buffer_pool.fetch_range(head_offset)?;
                {
                    let range = range_arc.lock();
                    for i in 0..self.num_columns {
                        cumulative[i] = range.page(self.config.offset + i).read(head_slot)?;
                    }
                }
                self.buffer_pool.unpin_range(head_offset);
            }
            None => {
                let range_arc = self.buffer_pool.fetch_range(base_offset)?;
                {
                    let range = range_arc.lock();
                    for i in 0..self.num_columns {
                        cumulative[i] = range.page(self.config.offset + i).read(base_slot)?;
                    }
                }
                self.buffer_pool.unpin_range(base_offset);
            }
        }

        for (i, update) in updates.iter().enumerate() {
            if let Some(value) = update {
                cumulative[i] = *value;
            }
        }

        let (mut tail_offset, chain_len) = self.traverse_tail(base_offset)?;
        if chain_len == 0 {
            let new_offset = dir.allocate_range_offset(self.config.file_page_length, false);
            self.buffer_pool.add_range(new_offset)?;
            self.disk.update_offset(&self.name, 0, base_offset, new_offset)?;
            tail_offset = new_offset;
        } else {
            let range_arc = self.buffer_pool.fetch_range(tail_offset)?;
            let has_capacity = range_arc.lock().has_capacity();
            self.buffer_pool.unpin_range(tail_offset);

            if !has_capacity {
                let new_offset = dir.allocate_range_offset(self.config.file_page_length, false);
                self.buffer_pool.add_range(new_offset)?;
                self.disk.update_offset(&self.name, 0, tail_offset, new_offset)?;
                tail_offset = new_offset;
            }
        }

        let tail_rid = dir.next_tail_rid();

        let mut row = vec![0i64; self.width];
        row[INDIRECTION_COL] = indirection_raw;
        row[RID_COL] = tail_rid.raw();
        row[TIMESTAMP_COL] = now_ts();
        row[BASE_RID_COL] = base_rid.raw();
        for i in 0..self.num_columns {
            row[self.config.offset + i] = cumulative[i];
        }

        let slot = {
            let range_arc = self.buffer_pool.fetch_range(tail_offset)?;
            let slot = range_arc.lock().write_row(&row)?;
            self.buffer_pool.unpin_range(tail_offset);
            slot
        };
        dir.record(tail_rid, tail_offset, slot);

        {
            let range_arc = self.buffer_pool.fetch_range(base_offset)?;
            range_arc.lock().set_indirection(base_slot, tail_rid.raw())?;
            self.buffer_pool.unpin_range(base_offset);
        }

        let (_, new_chain_len) = self.traverse_tail(base_offset)?;
        if new_chain_len >= self.config.tail_merge_limit {
            let base_full = {
                let range_arc = self.buffer_pool.fetch_range(base_offset)?;
                let full = !range_arc.lock().has_capacity();
                self.buffer_pool.unpin_range(base_offset);
                full
            };

            if base_full {
                debug!("enqueueing base range {base_offset} for merge");
                let _ = self.merge_tx.try_send(base_offset);
            }
        }

        debug!("appended tail rid {tail_rid:?} for base {base_rid:?}");
        Ok(tail_rid)
    }

    /// Read the projected user columns for `rid`, hopping to the tail
    /// chain's head when the base row hasn't been merged past it yet.
    pub fn read(&self, rid: Rid, projection: &[bool]) -> StorageResult<Vec<Option<i64>>> {
        let (offset, slot) = {
            let dir = self.directory.lock();
            dir.lookup(rid)?
        };

        let range_arc = self.buffer_pool.fetch_range(offset)?;
        let (rid_cell, indirection_raw, tps) = {
            let range = range_arc.lock();
            (range.rid_cell(slot)?, range.indirection(slot)?, range.page(INDIRECTION_COL).get_tps())
        };

        if rid_cell == 0 {
            self.buffer_pool.unpin_range(offset);
            return Err(crate::errors::StorageError::RidNotFound(rid));
        }

        if indirection_raw == 0 || (tps != 0 && indirection_raw >= tps) {
            let cols = {
                let range = range_arc.lock();
                self.read_user_columns(&range, slot, projection)?
            };
            self.buffer_pool.unpin_range(offset);
            return Ok(cols);
        }
        self.buffer_pool.unpin_range(offset);

        let tail_rid = Rid::from_raw(indirection_raw).expect("non-zero indirection below TPS");
        let (tail_offset, tail_slot) = {
            let dir = self.directory.lock();
            dir.lookup(tail_rid)?
        };
        let tail_range_arc = self.buffer_pool.fetch_range(tail_offset)?;
        let cols = {
            let range = tail_range_arc.lock();
            self.read_user_columns(&range, tail_slot, projection)?
        };
        self.buffer_pool.unpin_range(tail_offset);
        Ok(cols)
    }

    /// Tombstone a base record by zeroing its RID cell.
    pub fn delete(&self, rid: Rid) -> StorageResult<()> {
        let (offset, slot) = {
            let dir = self.directory.lock();
            dir.lookup(rid)?
        };

        let range_arc = self.buffer_pool.fetch_range(offset)?;
        range_arc.lock().set_rid_cell(slot, 0)?;
        self.buffer_pool.unpin_range(offset);
        Ok(())
    }

    /// Roll back the most recent update installed by an aborting
    /// transaction: invalidate the tail row it wrote and rewind the
    /// base's indirection to the prior chain head.
    pub fn undo_update(&self, base_rid: Rid) -> StorageResult<()> {
        let (base_offset, base_slot) = {
            let dir = self.directory.lock();
            dir.lookup(base_rid)?
        };

        let tail_rid_raw = {
            let range_arc = self.buffer_pool.fetch_range(base_offset)?;
            let v = range_arc.lock().indirection(base_slot)?;
            self.buffer_pool.unpin_range(base_offset);
            v
        };

        let tail_rid = match Rid::from_raw(tail_rid_raw) {
            Some(rid) => rid,
            None => return Ok(()),
        };

        let (tail_offset, tail_slot) = {
            let dir = self.directory.lock();
            dir.lookup(tail_rid)?
        };

        let prior_head = {
            let range_arc = self.buffer_pool.fetch_range(tail_offset)?;
            let mut range = range_arc.lock();
            let prior = range.indirection(tail_slot)?;
            range.set_rid_cell(tail_slot, 0)?;
            drop(range);
            self.buffer_pool.unpin_range(tail_offset);
            prior
        };

        let range_arc = self.buffer_pool.fetch_range(base_offset)?;
        range_arc.lock().set_indirection(base_slot, prior_head)?;
        self.buffer_pool.unpin_range(base_offset);

        debug!("undid update: base {base_rid:?} rewound past tail {tail_rid:?}");
        Ok(())
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.buffer_pool.flush_all()
    }

    /// The Tail Page Sequence number of `rid`'s range: the newest tail
    /// RID the background merge has already folded into the base row, or
    /// 0 if no merge has run for this range yet. Lets a caller observe
    /// merge completion directly instead of only its effect on reads.
    pub fn tps_for(&self, rid: Rid) -> StorageResult<i64> {
        let (offset, _slot) = {
            let dir = self.directory.lock();
            dir.lookup(rid)?
        };
        let range_arc = self.buffer_pool.fetch_range(offset)?;
        let tps = range_arc.lock().page(INDIRECTION_COL).get_tps();
        self.buffer_pool.unpin_range(offset);
        Ok(tps)
    }

    fn read_user_columns(&self, range: &Range, slot: usize, projection: &[bool]) -> StorageResult<Vec<Option<i64>>> {
        let mut out = Vec::with_capacity(projection.len());
        for (i, &wanted) in projection.iter().enumerate() {
            if wanted {
                out.push(Some(range.page(self.config.offset + i).read(slot)?));
            } else {
                out.push(None);
            }
        }
        Ok(out)
    }

    /// Walk the chain of tail ranges rooted at `base_offset`'s
    /// next-tail-offset link. Returns `(latest_offset, chain_length)`;
    /// `latest_offset == base_offset` and `chain_length == 0` mean no
    /// tail range has been allocated yet.
    fn traverse_tail(&self, base_offset: i64) -> StorageResult<(i64, usize)> {
        let mut current = self.disk.get_offset(&self.name, 0, base_offset)?;
        if current == 0 {
            return Ok((base_offset, 0));
        }

        let mut count = 1;
        loop {
            let next = self.disk.get_offset(&self.name, 0, current)?;
            if next == 0 {
                break;
            }
            current = next;
            count += 1;
        }
        Ok((current, count))
    }
}
