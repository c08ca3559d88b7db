//! Page directory and the two monotone range/RID counters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::{StorageError, StorageResult};
use crate::rid::Rid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Directory {
    #[serde(with = "entries_as_pairs")]
    entries: HashMap<Rid, (i64, usize)>,
    base_rid_counter: i64,
    tail_rid_counter: i64,
    base_offset_counter: i64,
    tail_offset_counter: i64,
    current_base_offset: Option<i64>,
}

/// `serde_json` maps require string keys; `Rid` is not a string, so the
/// entry map is (de)serialized as a plain vector of pairs instead.
mod entries_as_pairs {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::rid::Rid;

    pub fn serialize<S>(map: &HashMap<Rid, (i64, usize)>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let pairs: Vec<(Rid, (i64, usize))> = map.iter().map(|(k, v)| (*k, *v)).collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<Rid, (i64, usize)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(Rid, (i64, usize))>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

impl Directory {
    pub fn new(config: &Config) -> Self {
        Directory {
            entries: HashMap::new(),
            base_rid_counter: config.start_base_rid,
            tail_rid_counter: config.start_tail_rid,
            base_offset_counter: 0,
            tail_offset_counter: 0,
            current_base_offset: None,
        }
    }

    pub fn next_base_rid(&mut self) -> Rid {
        let rid = Rid::Base(self.base_rid_counter);
        self.base_rid_counter += 1;
        rid
    }

    pub fn next_tail_rid(&mut self) -> Rid {
        let rid = Rid::Tail(self.tail_rid_counter);
        self.tail_rid_counter -= 1;
        rid
    }

    pub fn record(&mut self, rid: Rid, offset: i64, slot: usize) {
        self.entries.insert(rid, (offset, slot));
    }

    pub fn lookup(&self, rid: Rid) -> StorageResult<(i64, usize)> {
        self.entries.get(&rid).copied().ok_or(StorageError::RidNotFound(rid))
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.entries.contains_key(&rid)
    }

    pub fn base_rid_counter(&self) -> i64 {
        self.base_rid_counter
    }

    pub fn tail_rid_counter(&self) -> i64 {
        self.tail_rid_counter
    }

    pub fn base_offset_counter(&self) -> i64 {
        self.base_offset_counter
    }

    pub fn tail_offset_counter(&self) -> i64 {
        self.tail_offset_counter
    }

    pub fn current_base_offset(&self) -> Option<i64> {
        self.current_base_offset
    }

    pub fn set_current_base_offset(&mut self, offset: i64) {
        self.current_base_offset = Some(offset);
    }

    /// Allocate a new range offset: `max(base, tail) + FilePageLength`.
    pub fn allocate_range_offset(&mut self, file_page_length: i64, is_base: bool) -> i64 {
        let new_offset = std::cmp::max(self.base_offset_counter, self.tail_offset_counter) + file_page_length;
        if is_base {
            self.base_offset_counter = new_offset;
        } else {
            self.tail_offset_counter = new_offset;
        }
        new_offset
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Rid, &(i64, usize))> {
        self.entries.iter()
    }
}
