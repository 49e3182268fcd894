//! Command Module
//!
//! The operation set a front end (the CLI) issues against a `Store`. Every
//! argument arrives as a string; `Store::execute` parses keys against the
//! table's declared key type and records as JSON objects.

use crate::catalog::Store;
use crate::codec::{parse_record, Key, Record};
use crate::compaction::CompactionStats;
use crate::error::{Result, StoreError};
use crate::table::Table;

/// A collaborator request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateDatabase { name: String },
    DeleteDatabase { name: String },
    RenameDatabase { old: String, new: String },
    /// List the tables of one database
    ListDatabase { name: String },
    /// List every database under the root
    ListDatabases,

    CreateTable {
        database: String,
        table: String,
        /// "integer" or "string"
        key_type: String,
    },
    /// Every record of a table, in key order
    ReadTable { database: String, table: String },
    DeleteTable { database: String, table: String },
    RenameTable {
        database: String,
        old: String,
        new: String,
    },

    /// Insert a record; without an explicit key it is taken from the
    /// record's key field
    CreateRecord {
        database: String,
        table: String,
        key: Option<String>,
        record: String,
    },
    ReadRecord {
        database: String,
        table: String,
        key: String,
    },
    UpdateRecord {
        database: String,
        table: String,
        key: String,
        record: String,
    },
    DeleteRecord {
        database: String,
        table: String,
        key: String,
    },

    CompactTable { database: String, table: String },
}

impl Command {
    /// Operation name as the collaborator spells it
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateDatabase { .. } => "createDatabase",
            Command::DeleteDatabase { .. } => "deleteDatabase",
            Command::RenameDatabase { .. } => "renameDatabase",
            Command::ListDatabase { .. } => "listDatabase",
            Command::ListDatabases => "listDatabases",
            Command::CreateTable { .. } => "createTable",
            Command::ReadTable { .. } => "readTable",
            Command::DeleteTable { .. } => "deleteTable",
            Command::RenameTable { .. } => "renameTable",
            Command::CreateRecord { .. } => "createRecord",
            Command::ReadRecord { .. } => "readRecord",
            Command::UpdateRecord { .. } => "updateRecord",
            Command::DeleteRecord { .. } => "deleteRecord",
            Command::CompactTable { .. } => "compactTable",
        }
    }
}

/// Successful result of a command
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Done,
    Names(Vec<String>),
    Record(Record),
    Records(Vec<(Key, Record)>),
    Compacted(CompactionStats),
}

impl Store {
    /// Run one command
    ///
    /// Routes commands to the catalog and table operations
    pub fn execute(&self, command: Command) -> Result<Output> {
        tracing::debug!("Executing {}", command.name());

        match command {
            Command::CreateDatabase { name } => {
                self.create_database(&name)?;
                Ok(Output::Done)
            }
            Command::DeleteDatabase { name } => {
                self.delete_database(&name)?;
                Ok(Output::Done)
            }
            Command::RenameDatabase { old, new } => {
                self.rename_database(&old, &new)?;
                Ok(Output::Done)
            }
            Command::ListDatabase { name } => self.list_tables(&name).map(Output::Names),
            Command::ListDatabases => self.list_databases().map(Output::Names),

            Command::CreateTable {
                database,
                table,
                key_type,
            } => {
                self.create_table(&database, &table, key_type.parse()?)?;
                Ok(Output::Done)
            }
            Command::ReadTable { database, table } => {
                let table = self.open_table(&database, &table)?;
                let records = table.scan()?.collect::<Result<Vec<_>>>()?;
                Ok(Output::Records(records))
            }
            Command::DeleteTable { database, table } => {
                self.delete_table(&database, &table)?;
                Ok(Output::Done)
            }
            Command::RenameTable { database, old, new } => {
                self.rename_table(&database, &old, &new)?;
                Ok(Output::Done)
            }

            Command::CreateRecord {
                database,
                table,
                key,
                record,
            } => {
                let table = self.open_table(&database, &table)?;
                let record = parse_record(&record)?;
                let key = match key {
                    Some(text) => Key::parse(&text, table.key_type())?,
                    None => key_from_record(&table, &record)?,
                };
                table.insert(&key, record)?;
                Ok(Output::Done)
            }
            Command::ReadRecord {
                database,
                table,
                key,
            } => {
                let table = self.open_table(&database, &table)?;
                let key = Key::parse(&key, table.key_type())?;
                table.get(&key).map(Output::Record)
            }
            Command::UpdateRecord {
                database,
                table,
                key,
                record,
            } => {
                let table = self.open_table(&database, &table)?;
                let key = Key::parse(&key, table.key_type())?;
                table.update(&key, parse_record(&record)?)?;
                Ok(Output::Done)
            }
            Command::DeleteRecord {
                database,
                table,
                key,
            } => {
                let table = self.open_table(&database, &table)?;
                let key = Key::parse(&key, table.key_type())?;
                table.delete(&key)?;
                Ok(Output::Done)
            }

            Command::CompactTable { database, table } => {
                let table = self.open_table(&database, &table)?;
                table.compact().map(Output::Compacted)
            }
        }
    }
}

fn key_from_record(table: &Table, record: &Record) -> Result<Key> {
    let field = table.key_field();
    let value = record.get(field).ok_or_else(|| {
        StoreError::InvalidRecord(format!(
            "record has no '{}' field and no key was given",
            field
        ))
    })?;
    Key::from_json(value, table.key_type())
}
