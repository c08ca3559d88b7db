//! Persistence collaborator.
//!
//! Pages are content-addressed by `(table_name, column_index,
//! range_offset)`. `MemDisk` keeps everything in a `HashMap` for tests;
//! `FileDisk` lays each column out as a flat file of fixed-size range
//! records with a small JSON sidecar tracking the next free offset.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read as IoRead, Seek, SeekFrom, Write as IoWrite};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::StorageResult;
use crate::page::Page;

pub trait Disk: Send + Sync {
    fn fetch_page(&self, table: &str, col: usize, offset: i64) -> StorageResult<Page>;
    fn write(&self, table: &str, col: usize, offset: i64, page: &Page) -> StorageResult<()>;
    fn get_offset(&self, table: &str, col: usize, offset: i64) -> StorageResult<i64>;
    fn update_offset(&self, table: &str, col: usize, offset: i64, next_offset: i64) -> StorageResult<()>;
}

/// In-memory `Disk` used by the crate's own tests so they don't depend on
/// filesystem I/O timing.
pub struct MemDisk {
    pages: Mutex<HashMap<(String, usize, i64), Page>>,
    links: Mutex<HashMap<(String, usize, i64), i64>>,
    page_entries: usize,
}

impl Default for MemDisk {
    fn default() -> Self {
        MemDisk::new()
    }
}

impl MemDisk {
    /// Defaults to a 512-entry page, matching `Config::default()`. Use
    /// `with_page_entries` when the caller's `Config` overrides
    /// `page_entries`, so a never-written page's geometry still matches
    /// what the table expects.
    pub fn new() -> Self {
        MemDisk {
            pages: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            page_entries: 512,
        }
    }

    pub fn with_page_entries(page_entries: usize) -> Self {
        MemDisk {
            pages: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            page_entries,
        }
    }
}

impl Disk for MemDisk {
    fn fetch_page(&self, table: &str, col: usize, offset: i64) -> StorageResult<Page> {
        let key = (table.to_string(), col, offset);
        let pages = self.pages.lock();
        Ok(pages.get(&key).cloned().unwrap_or_else(|| Page::new(self.page_entries)))
    }

    fn write(&self, table: &str, col: usize, offset: i64, page: &Page) -> StorageResult<()> {
        let key = (table.to_string(), col, offset);
        self.pages.lock().insert(key, page.clone());
        Ok(())
    }

    fn get_offset(&self, table: &str, col: usize, offset: i64) -> StorageResult<i64> {
        let key = (table.to_string(), col, offset);
        Ok(self.links.lock().get(&key).copied().unwrap_or(0))
    }

    fn update_offset(&self, table: &str, col: usize, offset: i64, next_offset: i64) -> StorageResult<()> {
        let key = (table.to_string(), col, offset);
        self.links.lock().insert(key, next_offset);
        Ok(())
    }
}

/// Per-range bookkeeping that rides alongside the raw page bytes in a
/// sibling `.meta` file: the chain's next-offset link and the persisted
/// record count (cell 0 is TPS-reserved, not a record count, so it can't
/// carry this).
#[derive(Serialize, Deserialize, Default, Clone, Copy)]
struct RangeMeta {
    next_offset: i64,
    num_records: usize,
}

/// `Disk` implementation backed by one directory per table and one flat
/// file per column, partitioned every `FilePageLength` bytes into
/// page-sized slots.
pub struct FileDisk {
    root: PathBuf,
    page_entries: usize,
    meta: Mutex<HashMap<(String, usize), HashMap<i64, RangeMeta>>>,
}

impl FileDisk {
    pub fn new(root: impl Into<PathBuf>, config: &Config) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileDisk {
            root,
            page_entries: config.page_entries,
            meta: Mutex::new(HashMap::new()),
        })
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    fn data_path(&self, table: &str, col: usize) -> PathBuf {
        self.table_dir(table).join(format!("{col}.dat"))
    }

    fn meta_path(&self, table: &str, col: usize) -> PathBuf {
        self.table_dir(table).join(format!("{col}.meta"))
    }

    fn load_meta_map(&self, table: &str, col: usize) -> HashMap<i64, RangeMeta> {
        let key = (table.to_string(), col);
        if let Some(map) = self.meta.lock().get(&key) {
            return map.clone();
        }

        let path = self.meta_path(table, col);
        let map: HashMap<i64, RangeMeta> = fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();

        self.meta.lock().insert(key, map.clone());
        map
    }

    fn store_meta_map(&self, table: &str, col: usize, map: HashMap<i64, RangeMeta>) -> StorageResult<()> {
        fs::create_dir_all(self.table_dir(table))?;
        let path = self.meta_path(table, col);
        let serialized = serde_json::to_vec(&map)?;
        fs::write(&path, serialized)?;
        self.meta.lock().insert((table.to_string(), col), map);
        Ok(())
    }

    fn open_data_file(&self, table: &str, col: usize) -> StorageResult<File> {
        fs::create_dir_all(self.table_dir(table))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.data_path(table, col))?;
        Ok(file)
    }

    fn byte_len(&self) -> usize {
        self.page_entries * 8
    }
}

impl Disk for FileDisk {
    fn fetch_page(&self, table: &str, col: usize, offset: i64) -> StorageResult<Page> {
        let mut file = self.open_data_file(table, col)?;
        let byte_len = self.byte_len();
        let mut buf = vec![0u8; byte_len];

        let file_len = file.metadata()?.len();
        if (offset as u64) < file_len {
            file.seek(SeekFrom::Start(offset as u64))?;
            let _ = file.read(&mut buf)?;
        }

        let mut cells = Vec::with_capacity(self.page_entries);
        for chunk in buf.chunks_exact(8) {
            cells.push(i64::from_be_bytes(chunk.try_into().unwrap()));
        }

        let meta_map = self.load_meta_map(table, col);
        let num_records = meta_map.get(&offset).map(|m| m.num_records).unwrap_or(1);

        Ok(Page::from_parts(cells, num_records))
    }

    fn write(&self, table: &str, col: usize, offset: i64, page: &Page) -> StorageResult<()> {
        let mut file = self.open_data_file(table, col)?;
        let mut buf = Vec::with_capacity(self.byte_len());
        for cell in page.cells() {
            buf.extend_from_slice(&cell.to_be_bytes());
        }

        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&buf)?;

        let mut meta_map = self.load_meta_map(table, col);
        let entry = meta_map.entry(offset).or_default();
        entry.num_records = page.num_records();
        self.store_meta_map(table, col, meta_map)?;

        Ok(())
    }

    fn get_offset(&self, table: &str, col: usize, offset: i64) -> StorageResult<i64> {
        let meta_map = self.load_meta_map(table, col);
        Ok(meta_map.get(&offset).map(|m| m.next_offset).unwrap_or(0))
    }

    fn update_offset(&self, table: &str, col: usize, offset: i64, next_offset: i64) -> StorageResult<()> {
        let mut meta_map = self.load_meta_map(table, col);
        let entry = meta_map.entry(offset).or_default();
        entry.next_offset = next_offset;
        self.store_meta_map(table, col, meta_map)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_disk_round_trips_a_page() {
        let disk = MemDisk::new();
        let mut page = Page::new(8);
        page.write(42).unwrap();
        disk.write("t", 0, 0, &page).unwrap();

        let fetched = disk.fetch_page("t", 0, 0).unwrap();
        assert_eq!(fetched.read(1).unwrap(), 42);
    }

    #[test]
    fn mem_disk_offsets_default_to_zero() {
        let disk = MemDisk::new();
        assert_eq!(disk.get_offset("t", 0, 0).unwrap(), 0);
        disk.update_offset("t", 0, 0, 512).unwrap();
        assert_eq!(disk.get_offset("t", 0, 0).unwrap(), 512);
    }

    #[test]
    fn file_disk_round_trips_a_page() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let disk = FileDisk::new(dir.path(), &config).unwrap();

        let mut page = Page::new(config.page_entries);
        page.write(7).unwrap();
        disk.write("orders", 0, 0, &page).unwrap();

        let fetched = disk.fetch_page("orders", 0, 0).unwrap();
        assert_eq!(fetched.read(1).unwrap(), 7);
        assert_eq!(fetched.num_records(), 2);
    }

    #[test]
    fn file_disk_persists_next_offset_link() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let disk = FileDisk::new(dir.path(), &config).unwrap();

        disk.update_offset("orders", 0, 0, 4096).unwrap();
        assert_eq!(disk.get_offset("orders", 0, 0).unwrap(), 4096);
    }
}
