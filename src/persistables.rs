//! On-disk metadata formats written by `Database::close` and read back by
//! `Database::open`.
//!
//! The buffer pool never persists its own frame table, only the dirty
//! pages it holds (via `flush_all`); what needs a durable format is the
//! page directory and the allocator counters, so this module covers
//! those, plus the table manifest that lets `Database::open` rediscover
//! which tables existed on a prior run.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::directory::Directory;
use crate::errors::StorageResult;

/// Six allocator counters encoded as big-endian `i64`s in fixed order:
/// `[base_RID, tail_RID, base_offset_counter, tail_offset_counter,
/// num_columns, key]`. Kept distinct from `page_directory.json` (below),
/// a fixed interchange format separate from the richer JSON snapshot
/// used for internal reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersFile {
    pub base_rid: i64,
    pub tail_rid: i64,
    pub base_offset_counter: i64,
    pub tail_offset_counter: i64,
    pub num_columns: i64,
    pub key: i64,
}

impl CountersFile {
    pub fn from_directory(dir: &Directory, num_columns: usize, key: usize) -> Self {
        CountersFile {
            base_rid: dir.base_rid_counter(),
            tail_rid: dir.tail_rid_counter(),
            base_offset_counter: dir.base_offset_counter(),
            tail_offset_counter: dir.tail_offset_counter(),
            num_columns: num_columns as i64,
            key: key as i64,
        }
    }

    pub fn to_bytes(self) -> [u8; 48] {
        let mut buf = [0u8; 48];
        for (i, value) in [
            self.base_rid,
            self.tail_rid,
            self.base_offset_counter,
            self.tail_offset_counter,
            self.num_columns,
            self.key,
        ]
        .iter()
        .enumerate()
        {
            buf[i * 8..i * 8 + 8].copy_from_slice(&value.to_be_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8; 48]) -> Self {
        let read = |i: usize| i64::from_be_bytes(buf[i * 8..i * 8 + 8].try_into().unwrap());
        CountersFile {
            base_rid: read(0),
            tail_rid: read(1),
            base_offset_counter: read(2),
            tail_offset_counter: read(3),
            num_columns: read(4),
            key: read(5),
        }
    }

    pub fn write_to(self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::write(path, self.to_bytes())
    }

    pub fn read_from(path: impl AsRef<Path>) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let arr: [u8; 48] = bytes.as_slice().try_into().map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "counters file is not 48 bytes"))?;
        Ok(Self::from_bytes(&arr))
    }
}

/// Manifest of tables known to a database instance, so `Database::open`
/// knows what to reopen.
#[derive(Serialize, Deserialize, Default)]
pub struct TableManifest {
    pub tables: Vec<TableManifestEntry>,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct TableManifestEntry {
    pub name: String,
    pub num_columns: usize,
    pub key: usize,
}

pub fn save_directory(path: impl AsRef<Path>, dir: &Directory) -> StorageResult<()> {
    let bytes = serde_json::to_vec(dir)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn load_directory(path: impl AsRef<Path>) -> StorageResult<Directory> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn save_manifest(path: impl AsRef<Path>, manifest: &TableManifest) -> StorageResult<()> {
    let bytes = serde_json::to_vec(manifest)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn load_manifest(path: impl AsRef<Path>) -> StorageResult<TableManifest> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(TableManifest::default()),
        Err(err) => Err(err.into()),
    }
}
