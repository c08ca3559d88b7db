//! Tunable knobs for a table's physical layout and buffer pool sizing:
//! page geometry, buffer pool capacity, merge threshold, RID start
//! points, and the database root directory name. Kept runtime-
//! configurable rather than compiled-in constants, since the test suite
//! exercises much smaller `buffersize`/`tail_merge_limit` values than a
//! production table would use.

/// Number of metadata columns that precede user columns in every range:
/// INDIRECTION, RID, TIMESTAMP, BASE_RID.
pub const NUM_METADATA_COLUMNS: usize = 4;

pub const INDIRECTION_COL: usize = 0;
pub const RID_COL: usize = 1;
pub const TIMESTAMP_COL: usize = 2;
pub const BASE_RID_COL: usize = 3;

#[derive(Clone, Debug)]
pub struct Config {
    /// Byte size of one page.
    pub page_length: usize,

    /// Record slots per page, including the TPS slot at index 0.
    pub page_entries: usize,

    /// Number of metadata columns (normally `NUM_METADATA_COLUMNS`).
    pub offset: usize,

    /// Logical stride between adjacent range offsets.
    pub file_page_length: i64,

    /// Maximum resident frames in the buffer pool.
    pub buffersize: usize,

    /// Tail-range count that triggers a merge.
    pub tail_merge_limit: usize,

    /// Initial base RID counter (base RIDs grow upward from here).
    pub start_base_rid: i64,

    /// Initial tail RID counter (tail RIDs shrink downward from here).
    pub start_tail_rid: i64,

    /// Root directory name for a database instance.
    pub db_name: String,
}

impl Config {
    /// Total columns in a range given the user's column count.
    pub fn width(&self, num_columns: usize) -> usize {
        self.offset + num_columns
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_length: 512 * 8,
            page_entries: 512,
            offset: NUM_METADATA_COLUMNS,
            file_page_length: 512 * 8,
            buffersize: 32,
            tail_merge_limit: 2,
            start_base_rid: 1,
            start_tail_rid: -1,
            db_name: "LSTOREDAT".to_string(),
        }
    }
}
