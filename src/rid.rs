//! Record identifiers.
//!
//! An explicit tagged enum rather than a signed integer: a `Rid` always
//! carries its own kind, so a caller can never accidentally treat a tail
//! version as a base row (or vice versa) just because a comparison
//! happened to go the wrong way.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rid {
    Base(i64),
    Tail(i64),
}

impl Rid {
    /// The raw cell value stored in RID/INDIRECTION/BASE_RID columns.
    /// Base rids are positive, tail rids are negative; 0 is reserved for
    /// "no indirection" / tombstone and is never a valid `Rid`.
    pub fn raw(self) -> i64 {
        match self {
            Rid::Base(v) => v,
            Rid::Tail(v) => v,
        }
    }

    /// Reconstruct a `Rid` from a raw cell value. Returns `None` for the
    /// sentinel `0` (no indirection / tombstoned row).
    pub fn from_raw(raw: i64) -> Option<Rid> {
        if raw == 0 {
            None
        } else if raw > 0 {
            Some(Rid::Base(raw))
        } else {
            Some(Rid::Tail(raw))
        }
    }

    pub fn is_base(self) -> bool {
        matches!(self, Rid::Base(_))
    }

    pub fn is_tail(self) -> bool {
        matches!(self, Rid::Tail(_))
    }
}
