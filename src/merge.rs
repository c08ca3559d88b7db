//! Background merge worker.
//!
//! A single long-lived thread drains a bounded channel of base-range
//! offsets queued for consolidation, folding tail updates into a base
//! snapshot and swapping it in once every range in the chain is
//! unpinned (`BufferPool::wait_until_unpinned`).

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::bufferpool::BufferPool;
use crate::config::{Config, INDIRECTION_COL};
use crate::directory::Directory;
use crate::disk::Disk;
use crate::range::Range;
use crate::rid::Rid;

pub fn spawn_merge_worker(
    name: String,
    num_columns: usize,
    config: Config,
    buffer_pool: Arc<BufferPool>,
    disk: Arc<dyn Disk>,
    directory: Arc<Mutex<Directory>>,
    rx: Receiver<i64>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for base_offset in rx.iter() {
            if let Err(err) = run_merge(
                &name,
                num_columns,
                &config,
                &buffer_pool,
                &*disk,
                &directory,
                base_offset,
            ) {
                warn!("merge of base range {base_offset} failed: {err}");
            }
        }
    })
}

fn run_merge(
    name: &str,
    num_columns: usize,
    config: &Config,
    buffer_pool: &BufferPool,
    disk: &dyn Disk,
    directory: &Mutex<Directory>,
    base_offset: i64,
) -> crate::errors::StorageResult<()> {
    debug!("merge starting for base range {base_offset}");

    // Step 1: snapshot the base range by cloning its byte buffers; unpin
    // immediately so foreground traffic is never blocked on the merge.
    let base_handle = buffer_pool.fetch_range(base_offset)?;
    let mut consolidated: Range = base_handle.lock().clone();
    buffer_pool.unpin_range(base_offset);

    // Step 2: walk the tail chain from its head, collecting the first
    // TailMergeLimit offsets. The chain is linked oldest-to-newest
    // (`allocate_tail_range` always links the predecessor forward), so
    // this collection is already in the oldest-first order step 3 wants.
    let mut tail_offsets = Vec::new();
    let mut cursor = disk.get_offset(name, 0, base_offset)?;
    while cursor != 0 && tail_offsets.len() < config.tail_merge_limit {
        tail_offsets.push(cursor);
        cursor = disk.get_offset(name, 0, cursor)?;
    }

    if tail_offsets.len() < config.tail_merge_limit {
        debug!("merge of base range {base_offset} is a no-op: tail chain too short");
        return Ok(());
    }

    let dir = directory.lock();

    // Step 3: fold each tail range's rows into the base copy, oldest
    // first, applying the "latest wins" filter.
    let mut newest_tail_rid_in_frontier = 0i64;
    for &tail_offset in &tail_offsets {
        let tail_handle = buffer_pool.fetch_range(tail_offset)?;
        let tail_range = tail_handle.lock().clone();
        buffer_pool.unpin_range(tail_offset);

        let num_records = tail_range.num_records();
        for slot in 1..num_records {
            let tail_rid_raw = tail_range.rid_cell(slot)?;
            if tail_rid_raw == 0 {
                // Aborted or deleted tail row.
                continue;
            }

            let base_rid_raw = tail_range.base_rid_cell(slot)?;
            let base_rid = match Rid::from_raw(base_rid_raw) {
                Some(r) => r,
                None => continue,
            };

            let (owning_base_offset, base_slot) = match dir.lookup(base_rid) {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            if owning_base_offset != base_offset {
                continue;
            }

            let current_indirection = consolidated.page(INDIRECTION_COL).read(base_slot)?;
            if current_indirection == tail_rid_raw {
                for i in 0..num_columns {
                    let col = config.offset + i;
                    let value = tail_range.page(col).read(slot)?;
                    consolidated.page_mut(col).inplace_update(base_slot, value)?;
                }
            }

            if tail_rid_raw.abs() > newest_tail_rid_in_frontier.abs() {
                newest_tail_rid_in_frontier = tail_rid_raw;
            }
        }
    }
    drop(dir);

    // Step 4: TPS is the RID cell at slot PageEntries-1 of the last
    // collected range, i.e. the newest tail RID just past the merged
    // frontier.
    let last_offset = *tail_offsets.last().unwrap();
    let last_handle = buffer_pool.fetch_range(last_offset)?;
    let tps = {
        let range = last_handle.lock();
        range.rid_cell(config.page_entries - 1).unwrap_or(newest_tail_rid_in_frontier)
    };
    buffer_pool.unpin_range(last_offset);

    // Step 5: stamp the consolidated range's TPS on every column page.
    for col in 0..consolidated.width() {
        consolidated.page_mut(col).update_tps(tps);
    }

    // Step 6: the merged base range's next-tail link now points past the
    // folded tails.
    let next_link = disk.get_offset(name, 0, last_offset)?;
    disk.update_offset(name, 0, base_offset, next_link)?;

    // Step 7: wait for the base frame to be unpinned, then atomically
    // swap in the consolidated range.
    buffer_pool.wait_until_unpinned(base_offset);
    buffer_pool.swap_range(base_offset, consolidated);

    debug!("merge of base range {base_offset} complete, tps={tps}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::rid::Rid;

    /// A two-record-per-page geometry so a single row fills a range to
    /// capacity and lands on the `page_entries - 1` slot `run_merge`
    /// reads the TPS from.
    fn test_config() -> Config {
        let mut config = Config::default();
        config.page_entries = 2;
        config.tail_merge_limit = 2;
        config
    }

    #[test]
    fn run_merge_advances_tps_and_folds_the_latest_tail_value_into_the_base_range() {
        let config = test_config();
        let num_columns = 1;
        let width = config.width(num_columns);
        let disk: Arc<dyn Disk> = Arc::new(MemDisk::with_page_entries(config.page_entries));
        let buffer_pool = Arc::new(BufferPool::new("merge_test", width, disk.clone(), &config));
        let directory = Arc::new(Mutex::new(Directory::new(&config)));

        let base_rid = Rid::Base(2);
        let base_offset = 1000;
        let tail_offset_1 = 2000;
        let tail_offset_2 = 3000;

        // Base range: one row, filled to capacity (page_entries=2).
        // `add_range` leaves the frame unpinned, so no `unpin_range` is
        // needed here.
        {
            let range_arc = buffer_pool.add_range(base_offset).unwrap();
            let slot = range_arc.lock().write_row(&[0, base_rid.raw(), 0, 0, 20]).unwrap();
            directory.lock().record(base_rid, base_offset, slot);
        }

        // Oldest tail: first update, value 21.
        {
            let range_arc = buffer_pool.add_range(tail_offset_1).unwrap();
            range_arc.lock().write_row(&[0, -1, 0, base_rid.raw(), 21]).unwrap();
            disk.update_offset("merge_test", 0, base_offset, tail_offset_1).unwrap();
        }

        // Newest tail: second update, value 22 — this is the one that
        // should win the "latest wins" fold.
        {
            let range_arc = buffer_pool.add_range(tail_offset_2).unwrap();
            range_arc.lock().write_row(&[-1, -2, 0, base_rid.raw(), 22]).unwrap();
            disk.update_offset("merge_test", 0, tail_offset_1, tail_offset_2).unwrap();
        }

        // The base row's indirection points at the newest tail, as
        // `Table::update` would have left it.
        {
            let range_arc = buffer_pool.fetch_range(base_offset).unwrap();
            range_arc.lock().set_indirection(1, -2).unwrap();
            buffer_pool.unpin_range(base_offset);
        }

        run_merge("merge_test", num_columns, &config, &buffer_pool, &*disk, &directory, base_offset).unwrap();

        let range_arc = buffer_pool.fetch_range(base_offset).unwrap();
        let merged = range_arc.lock();
        assert_eq!(merged.page(INDIRECTION_COL).get_tps(), -2);
        assert_eq!(merged.page(config.offset).read(1).unwrap(), 22);
        drop(merged);
        buffer_pool.unpin_range(base_offset);

        // The base range's tail link now points past the folded chain.
        assert_eq!(disk.get_offset("merge_test", 0, base_offset).unwrap(), 0);
    }

    #[test]
    fn run_merge_is_a_no_op_when_the_tail_chain_is_shorter_than_the_merge_limit() {
        let config = test_config();
        let num_columns = 1;
        let width = config.width(num_columns);
        let disk: Arc<dyn Disk> = Arc::new(MemDisk::with_page_entries(config.page_entries));
        let buffer_pool = Arc::new(BufferPool::new("merge_test", width, disk.clone(), &config));
        let directory = Arc::new(Mutex::new(Directory::new(&config)));

        let base_rid = Rid::Base(1);
        let base_offset = 1000;

        let range_arc = buffer_pool.add_range(base_offset).unwrap();
        range_arc.lock().write_row(&[0, base_rid.raw(), 0, 0, 10]).unwrap();
        directory.lock().record(base_rid, base_offset, 1);

        // No tail chain at all: `disk.get_offset` defaults to 0.
        run_merge("merge_test", num_columns, &config, &buffer_pool, &*disk, &directory, base_offset).unwrap();

        let range_arc = buffer_pool.fetch_range(base_offset).unwrap();
        assert_eq!(range_arc.lock().page(INDIRECTION_COL).get_tps(), 0);
        buffer_pool.unpin_range(base_offset);
    }
}

