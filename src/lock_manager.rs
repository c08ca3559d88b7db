//! Record-level strict two-phase locking.
//!
//! The two lock tables (`read_locks`, `write_locks`) are each guarded by
//! their own mutex, latched in a fixed read-then-write order so that no
//! two callers can deadlock against each other while merely acquiring the
//! latches. The locks they protect never block: a conflict returns
//! `false` immediately rather than waiting, and conflict resolution is
//! left to the caller (retry, abort, or back off).

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::rid::Rid;

pub type TxnId = u64;

pub struct LockManager {
    read_locks: Mutex<HashMap<Rid, HashSet<TxnId>>>,
    write_locks: Mutex<HashMap<Rid, TxnId>>,
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager {
            read_locks: Mutex::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A write-lock holder re-acquiring a read lock on the same rid is a
    /// no-op: the holder is not added to `read_locks`, since the write
    /// lock already dominates (Open Question resolution, not the
    /// original source's actual behavior of adding the holder anyway).
    pub fn acquire_read(&self, rid: Rid, txn: TxnId) -> bool {
        let mut read_locks = self.read_locks.lock();
        let write_locks = self.write_locks.lock();

        match write_locks.get(&rid) {
            Some(&holder) if holder == txn => true,
            Some(_) => false,
            None => {
                read_locks.entry(rid).or_default().insert(txn);
                true
            }
        }
    }

    pub fn acquire_write(&self, rid: Rid, txn: TxnId) -> bool {
        let read_locks = self.read_locks.lock();
        let mut write_locks = self.write_locks.lock();

        if let Some(readers) = read_locks.get(&rid) {
            if readers.iter().any(|&holder| holder != txn) {
                return false;
            }
        }

        match write_locks.get(&rid) {
            Some(&holder) => holder == txn,
            None => {
                write_locks.insert(rid, txn);
                true
            }
        }
    }

    pub fn release_locks(&self, txn: TxnId) {
        let mut read_locks = self.read_locks.lock();
        let mut write_locks = self.write_locks.lock();

        for readers in read_locks.values_mut() {
            readers.remove(&txn);
        }
        read_locks.retain(|_, readers| !readers.is_empty());
        write_locks.retain(|_, &mut holder| holder != txn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_writers_fail_second_acquire() {
        let lm = LockManager::new();
        let rid = Rid::Base(1);
        assert!(lm.acquire_write(rid, 1));
        assert!(!lm.acquire_write(rid, 2));
    }

    #[test]
    fn write_holder_read_reacquire_is_noop() {
        let lm = LockManager::new();
        let rid = Rid::Base(1);
        assert!(lm.acquire_write(rid, 1));
        assert!(lm.acquire_read(rid, 1));
        // A second txn must still be blocked from writing.
        assert!(!lm.acquire_write(rid, 2));
    }

    #[test]
    fn reader_blocks_other_writer() {
        let lm = LockManager::new();
        let rid = Rid::Base(1);
        assert!(lm.acquire_read(rid, 1));
        assert!(!lm.acquire_write(rid, 2));
    }

    #[test]
    fn release_locks_frees_both_tables() {
        let lm = LockManager::new();
        let rid = Rid::Base(1);
        lm.acquire_write(rid, 1);
        lm.release_locks(1);
        assert!(lm.acquire_write(rid, 2));
    }
}
