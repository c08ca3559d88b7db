//! Process-level bootstrap: directory creation, table registry, open/close.
//!
//! `Database` owns a single `Arc<LockManager>` shared by every table's
//! `Query`, so record-level 2PL is a property of the whole engine rather
//! than of any one table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};

use crate::config::Config;
use crate::disk::{Disk, FileDisk};
use crate::errors::StorageResult;
use crate::lock_manager::LockManager;
use crate::persistables::{self, CountersFile, TableManifest, TableManifestEntry};
use crate::table::Table;

pub struct Database {
    root: PathBuf,
    config: Config,
    disk: Arc<dyn Disk>,
    lock_manager: Arc<LockManager>,
    tables: HashMap<String, Arc<Table>>,
}

impl Database {
    /// Open a database rooted at `./{config.db_name}`.
    pub fn open_default(config: Config) -> StorageResult<Self> {
        let root = PathBuf::from(format!("./{}", config.db_name));
        Self::open(root, config)
    }

    /// Open (creating if absent) a database rooted at `path`, reopening
    /// any tables listed in its manifest.
    pub fn open(path: impl Into<PathBuf>, config: Config) -> StorageResult<Self> {
        let root = path.into();
        std::fs::create_dir_all(&root)?;
        let disk: Arc<dyn Disk> = Arc::new(FileDisk::new(&root, &config)?);

        let mut db = Database {
            root,
            config,
            disk,
            lock_manager: Arc::new(LockManager::new()),
            tables: HashMap::new(),
        };

        let manifest = persistables::load_manifest(db.manifest_path())?;
        for entry in manifest.tables {
            db.reopen_table(entry)?;
        }

        Ok(db)
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        self.lock_manager.clone()
    }

    /// Create a new table and register it with this database.
    pub fn create_table(&mut self, name: impl Into<String>, num_columns: usize, key: usize) -> Arc<Table> {
        let name = name.into();
        let table = Table::open(name.clone(), num_columns, key, self.disk.clone(), self.config.clone());
        self.tables.insert(name, table.clone());
        table
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    pub fn drop_table(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    /// Flush every table's buffer pool and persist its page directory,
    /// counters file, and the table manifest.
    pub fn close(&self) -> StorageResult<()> {
        let mut manifest = TableManifest::default();

        for (name, table) in &self.tables {
            if let Err(err) = table.flush() {
                warn!("flush of table {name} failed: {err}");
            }

            let table_dir = self.table_dir(name);
            std::fs::create_dir_all(&table_dir)?;

            let directory = table.directory_snapshot();
            persistables::save_directory(table_dir.join("page_directory.json"), &directory)?;

            let counters = CountersFile::from_directory(&directory, table.num_columns, table.key);
            counters.write_to(table_dir.join("counters.bin"))?;

            manifest.tables.push(TableManifestEntry {
                name: name.clone(),
                num_columns: table.num_columns,
                key: table.key,
            });
        }

        persistables::save_manifest(self.manifest_path(), &manifest)?;
        debug!("database at {:?} closed, {} tables persisted", self.root, manifest.tables.len());
        Ok(())
    }

    fn reopen_table(&mut self, entry: TableManifestEntry) -> StorageResult<()> {
        let table_dir = self.table_dir(&entry.name);
        let directory_path = table_dir.join("page_directory.json");

        let directory = if directory_path.exists() {
            persistables::load_directory(&directory_path)?
        } else {
            crate::directory::Directory::new(&self.config)
        };

        let table = Table::reopen(entry.name.clone(), entry.num_columns, entry.key, self.disk.clone(), self.config.clone(), directory);
        self.tables.insert(entry.name, table);
        Ok(())
    }

    fn table_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("tables.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_then_reopen_preserves_directory() {
        let tmp = tempfile::tempdir().unwrap();

        {
            let mut db = Database::open(tmp.path(), Config::default()).unwrap();
            let table = db.create_table("grades", 3, 0);
            table.insert(&[1, 90, 80]).unwrap();
            db.close().unwrap();
        }

        let db = Database::open(tmp.path(), Config::default()).unwrap();
        let table = db.get_table("grades").unwrap();
        let row = table.read(crate::rid::Rid::Base(1), &[true, true, true]).unwrap();
        assert_eq!(row, vec![Some(1), Some(90), Some(80)]);
    }
}
