//! Catalog Module
//!
//! Maps database and table names onto the directory tree under the storage
//! root and keeps one shared handle per open table.
//!
//! ## Layout
//! ```text
//!   <root>/
//!     <database>/
//!       <table>/
//!         table.meta
//!         segment-0000000001.log
//!         segment-0000000002.log
//! ```
//!
//! ## Responsibilities
//! - Create/delete/rename/list databases (directories)
//! - Create/open/delete/rename/list tables (subdirectories)
//! - Hand out one `Arc<Table>` per table so every caller shares its index
//! - Keep open handles consistent across renames and deletes

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::codec::KeyType;
use crate::config::Config;
use crate::error::{Entity, Result, StoreError};
use crate::table::{Table, TableOptions};

type TableKey = (String, String);

/// Entry point: a storage root holding databases
pub struct Store {
    config: Config,
    root: PathBuf,

    /// Open tables keyed by (database, table)
    tables: Mutex<HashMap<TableKey, Arc<Table>>>,
}

impl Store {
    /// Open (creating if needed) the storage root named by `config`
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.root_dir)?;
        let root = config.root_dir.clone();

        tracing::info!("Opened store at {}", root.display());

        Ok(Self {
            config,
            root,
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Open a storage root with default settings
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Config::builder().root_dir(path).build())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Databases
    // =========================================================================

    pub fn create_database(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let dir = self.database_dir(name);
        if dir.exists() {
            return Err(StoreError::already_exists(Entity::Database, name));
        }

        fs::create_dir(&dir)?;
        tracing::info!("Created database '{}'", name);
        Ok(())
    }

    /// Delete a database and every table in it
    pub fn delete_database(&self, name: &str) -> Result<()> {
        let dir = self.existing_database(name)?;

        let mut tables = self.tables.lock();
        let open = open_in(&tables, name);
        let guards = lock_all(&open)?;

        fs::remove_dir_all(&dir)?;

        for ((table_name, table), guard) in open.iter().zip(&guards) {
            table.mark_dropped(guard);
            tables.remove(&(name.to_string(), table_name.clone()));
        }

        tracing::info!("Deleted database '{}'", name);
        Ok(())
    }

    /// Rename a database with one directory rename
    pub fn rename_database(&self, old: &str, new: &str) -> Result<()> {
        let old_dir = self.existing_database(old)?;
        validate_name(new)?;
        let new_dir = self.database_dir(new);
        if new_dir.exists() {
            return Err(StoreError::already_exists(Entity::Database, new));
        }

        let mut tables = self.tables.lock();
        let open = open_in(&tables, old);
        let guards = lock_all(&open)?;

        fs::rename(&old_dir, &new_dir)?;

        for ((table_name, table), guard) in open.iter().zip(&guards) {
            table.relocate(guard, new_dir.join(table_name), table_name);
            tables.remove(&(old.to_string(), table_name.clone()));
            tables.insert((new.to_string(), table_name.clone()), Arc::clone(table));
        }

        tracing::info!("Renamed database '{}' to '{}'", old, new);
        Ok(())
    }

    /// Database names, sorted
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut names = subdirectories(&self.root)?;
        names.sort();
        Ok(names)
    }

    pub fn database_exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.database_dir(name).is_dir()
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Table names of a database, in directory enumeration order
    ///
    /// The order is whatever the filesystem returns and is not stable across
    /// platforms; sort if you need a fixed order.
    pub fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let dir = self.existing_database(database)?;
        subdirectories(&dir)
    }

    /// Create a table whose records are keyed by the `"id"` field
    pub fn create_table(&self, database: &str, table: &str, key_type: KeyType) -> Result<Arc<Table>> {
        self.create_table_with(database, table, TableOptions::new(key_type))
    }

    pub fn create_table_with(
        &self,
        database: &str,
        table: &str,
        options: TableOptions,
    ) -> Result<Arc<Table>> {
        let db_dir = self.existing_database(database)?;
        validate_name(table)?;

        let mut tables = self.tables.lock();
        let handle = Arc::new(Table::create(&db_dir.join(table), table, &options, &self.config)?);
        tables.insert(table_key(database, table), Arc::clone(&handle));

        tracing::info!(
            "Created table '{}.{}' ({} keys in field '{}')",
            database,
            table,
            options.key_type,
            options.key_field
        );
        Ok(handle)
    }

    /// Shared handle to a table, opening it on first use
    pub fn open_table(&self, database: &str, table: &str) -> Result<Arc<Table>> {
        let db_dir = self.existing_database(database)?;
        validate_name(table)?;

        let mut tables = self.tables.lock();
        if let Some(handle) = tables.get(&table_key(database, table)) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(Table::open(&db_dir.join(table), table, &self.config)?);
        tables.insert(table_key(database, table), Arc::clone(&handle));
        Ok(handle)
    }

    pub fn delete_table(&self, database: &str, table: &str) -> Result<()> {
        let dir = self.existing_table(database, table)?;

        let mut tables = self.tables.lock();
        match tables.get(&table_key(database, table)).cloned() {
            Some(handle) => {
                let guard = handle.lock_writes()?;
                fs::remove_dir_all(&dir)?;
                handle.mark_dropped(&guard);
                tables.remove(&table_key(database, table));
            }
            None => fs::remove_dir_all(&dir)?,
        }

        tracing::info!("Deleted table '{}.{}'", database, table);
        Ok(())
    }

    pub fn rename_table(&self, database: &str, old: &str, new: &str) -> Result<()> {
        let old_dir = self.existing_table(database, old)?;
        validate_name(new)?;
        let new_dir = self.database_dir(database).join(new);
        if new_dir.exists() {
            return Err(StoreError::already_exists(Entity::Table, new));
        }

        let mut tables = self.tables.lock();
        match tables.remove(&table_key(database, old)) {
            Some(handle) => {
                let renamed = lock_and_rename(&handle, &old_dir, &new_dir, new);
                // Whatever happened on disk, the handle lives under one key
                let key = if renamed.is_ok() { new } else { old };
                tables.insert(table_key(database, key), handle);
                renamed?;
            }
            None => fs::rename(&old_dir, &new_dir)?,
        }

        tracing::info!("Renamed table '{}.{}' to '{}'", database, old, new);
        Ok(())
    }

    // =========================================================================
    // Paths
    // =========================================================================

    fn database_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn existing_database(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let dir = self.database_dir(name);
        if !dir.is_dir() {
            return Err(StoreError::not_found(Entity::Database, name));
        }
        Ok(dir)
    }

    fn existing_table(&self, database: &str, table: &str) -> Result<PathBuf> {
        let db_dir = self.existing_database(database)?;
        validate_name(table)?;
        let dir = db_dir.join(table);
        if !dir.is_dir() {
            return Err(StoreError::not_found(Entity::Table, table));
        }
        Ok(dir)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("open_tables", &self.tables.lock().len())
            .finish_non_exhaustive()
    }
}

fn table_key(database: &str, table: &str) -> TableKey {
    (database.to_string(), table.to_string())
}

/// Open handles of one database, as (table name, handle)
fn open_in(tables: &HashMap<TableKey, Arc<Table>>, database: &str) -> Vec<(String, Arc<Table>)> {
    tables
        .iter()
        .filter(|((db, _), _)| db == database)
        .map(|((_, table), handle)| (table.clone(), Arc::clone(handle)))
        .collect()
}

fn lock_all(open: &[(String, Arc<Table>)]) -> Result<Vec<MutexGuard<'_, ()>>> {
    open.iter().map(|(_, table)| table.lock_writes()).collect()
}

fn lock_and_rename(table: &Table, old_dir: &Path, new_dir: &Path, new_name: &str) -> Result<()> {
    let guard = table.lock_writes()?;
    fs::rename(old_dir, new_dir)?;
    table.relocate(&guard, new_dir.to_path_buf(), new_name);
    Ok(())
}

/// Names of the subdirectories of `dir`, in enumeration order
fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!("Skipping non UTF-8 directory name {:?}", raw),
        }
    }
    Ok(names)
}

/// Database and table names become single path components
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
