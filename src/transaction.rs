//! Ordered query log with abort/commit semantics.
//!
//! A `Transaction` accumulates operations (`add_insert`/`add_update`/...)
//! and only dispatches them against the `Query` layer when `run()` is
//! called. On the first failed op, `abort()` replays every applied
//! `update`/`increment` in reverse via `Query::undo` before releasing
//! locks; a clean run releases locks via `commit()` instead.

use std::sync::Arc;

use log::debug;

use crate::lock_manager::{LockManager, TxnId};
use crate::query::{Query, Record};
use crate::rid::Rid;

enum Op {
    Insert { query: Arc<Query>, columns: Vec<i64> },
    Update { query: Arc<Query>, key: i64, updates: Vec<Option<i64>> },
    Select { query: Arc<Query>, key: i64, projection: Vec<bool> },
    Delete { query: Arc<Query>, key: i64 },
    Sum { query: Arc<Query>, start: i64, end: i64, column: usize },
    Increment { query: Arc<Query>, key: i64, column: usize },
}

/// A `base_rid` an update or increment touched, tracked so `abort` can
/// roll it back with `Query::undo`.
struct AppliedWrite {
    query: Arc<Query>,
    base_rid: Rid,
}

pub struct Transaction {
    id: TxnId,
    lock_manager: Arc<LockManager>,
    ops: Vec<Op>,
    applied: Vec<AppliedWrite>,
}

impl Transaction {
    pub fn new(id: TxnId, lock_manager: Arc<LockManager>) -> Self {
        Transaction {
            id,
            lock_manager,
            ops: Vec::new(),
            applied: Vec::new(),
        }
    }

    pub fn add_insert(&mut self, query: Arc<Query>, columns: Vec<i64>) {
        self.ops.push(Op::Insert { query, columns });
    }

    pub fn add_update(&mut self, query: Arc<Query>, key: i64, updates: Vec<Option<i64>>) {
        self.ops.push(Op::Update { query, key, updates });
    }

    pub fn add_select(&mut self, query: Arc<Query>, key: i64, projection: Vec<bool>) {
        self.ops.push(Op::Select { query, key, projection });
    }

    pub fn add_delete(&mut self, query: Arc<Query>, key: i64) {
        self.ops.push(Op::Delete { query, key });
    }

    pub fn add_sum(&mut self, query: Arc<Query>, start: i64, end: i64, column: usize) {
        self.ops.push(Op::Sum { query, start, end, column });
    }

    pub fn add_increment(&mut self, query: Arc<Query>, key: i64, column: usize) {
        self.ops.push(Op::Increment { query, key, column });
    }

    /// Execute every queued operation in order. Stops and aborts at the
    /// first failure (typically a lock-acquire miss); otherwise commits.
    /// Returns `true` on commit, `false` on abort.
    pub fn run(&mut self) -> bool {
        let ops = std::mem::take(&mut self.ops);
        for op in ops {
            let ok = match op {
                Op::Insert { query, columns } => {
                    let (ok, _) = query.insert(&columns, &self.lock_manager, self.id);
                    ok
                }
                Op::Update { query, key, updates } => {
                    let base_rid = query.locate(key);
                    let (ok, _) = query.update(key, &updates, &self.lock_manager, self.id);
                    if ok {
                        if let Some(base_rid) = base_rid {
                            self.applied.push(AppliedWrite { query, base_rid });
                        }
                    }
                    ok
                }
                Op::Select { query, key, projection } => {
                    let (ok, _records): (bool, Vec<Record>) = query.select(key, &projection, &self.lock_manager, self.id);
                    ok
                }
                Op::Delete { query, key } => {
                    let (ok, _) = query.delete(key, &self.lock_manager, self.id);
                    ok
                }
                Op::Sum { query, start, end, column } => {
                    let (ok, _total) = query.sum(start, end, column, &self.lock_manager, self.id);
                    ok
                }
                Op::Increment { query, key, column } => {
                    let base_rid = query.locate(key);
                    let (ok, _) = query.increment(key, column, &self.lock_manager, self.id);
                    if ok {
                        if let Some(base_rid) = base_rid {
                            self.applied.push(AppliedWrite { query, base_rid });
                        }
                    }
                    ok
                }
            };

            if !ok {
                self.abort();
                return false;
            }
        }

        self.commit();
        true
    }

    /// Release every lock this transaction acquired, without rolling back
    /// any writes. Called on successful completion of `run`.
    fn commit(&self) {
        self.lock_manager.release_locks(self.id);
    }

    /// Replay applied updates/increments in reverse, undoing each one,
    /// then release every lock this transaction acquired.
    fn abort(&mut self) {
        for applied in self.applied.drain(..).rev() {
            if let Err(err) = applied.query.undo(applied.base_rid) {
                debug!("undo of {:?} during abort failed: {err}", applied.base_rid);
            }
        }
        self.lock_manager.release_locks(self.id);
    }
}
