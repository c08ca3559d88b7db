//! Structured error handling for the storage engine.

use thiserror::Error;

use crate::rid::Rid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("page offset out of bounds")]
    OffsetOutOfBounds,

    #[error("physical page has no more capacity")]
    PageFull,

    #[error("page range has been filled to capacity")]
    RangeFull,

    #[error("rid {0:?} not found in page directory")]
    RidNotFound(Rid),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
