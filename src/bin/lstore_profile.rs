//! Development/benchmarking harness: drives a table through a random mix
//! of insert/update/select traffic the same way an external caller
//! would, to surface performance problems without a test harness in the
//! way. Not a user-facing interface.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;

use lstore_rs::config::Config;
use lstore_rs::disk::MemDisk;
use lstore_rs::lock_manager::LockManager;
use lstore_rs::query::Query;
use lstore_rs::table::Table;

const NUM_COLUMNS: usize = 8;
const NUM_OPERATIONS: usize = 250_000;

fn main() {
    env_logger::init();

    let config = Config::default();
    let table = Table::open("prof_tbl", NUM_COLUMNS, 0, Arc::new(MemDisk::new()), config);
    let query = Query::new(table, 0);
    let lock_manager = LockManager::new();

    let mut primary_keys: HashSet<i64> = HashSet::new();
    let mut rng = rand::thread_rng();

    for i in 0..NUM_OPERATIONS {
        match rng.gen_range(0..3) {
            0 => {
                let row: Vec<i64> = (0..NUM_COLUMNS).map(|_| rng.gen_range(1..=100)).collect();
                primary_keys.insert(row[0]);
                query.insert(&row, &lock_manager, i as u64);
            }
            1 => {
                let key = rng.gen_range(1..=100);
                if primary_keys.contains(&key) {
                    let updates: Vec<Option<i64>> = (0..NUM_COLUMNS).map(|_| Some(rng.gen_range(1..=100))).collect();
                    query.update(key, &updates, &lock_manager, i as u64);
                }
            }
            2 => {
                let key = rng.gen_range(1..=100);
                let projection: Vec<bool> = (0..NUM_COLUMNS).map(|_| rng.gen_bool(0.5)).collect();
                query.select(key, &projection, &lock_manager, i as u64);
            }
            _ => unreachable!(),
        }

        if i % 10_000 == 0 {
            println!("{i}/{NUM_OPERATIONS}");
        }
    }
}
