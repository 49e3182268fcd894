//! TableKV CLI
//!
//! Command-line front end: one subcommand per store operation, run against
//! a storage root on the local disk.

use clap::{Parser, Subcommand};
use serde_json::Value;
use tablekv::{Command, Config, Output, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// TableKV CLI
#[derive(Parser, Debug)]
#[command(name = "tablekv-cli")]
#[command(about = "Embedded log-structured record store")]
#[command(version)]
struct Args {
    /// Storage root directory
    #[arg(short, long, default_value = "./tablekv_data")]
    root: String,

    /// fsync after every write instead of in batches
    #[arg(long)]
    sync_every_write: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a database
    CreateDatabase { name: String },

    /// Delete a database and all of its tables
    DeleteDatabase { name: String },

    /// Rename a database
    RenameDatabase { old: String, new: String },

    /// List the tables of a database
    ListDatabase { name: String },

    /// List all databases
    ListDatabases,

    /// Create a table
    CreateTable {
        database: String,
        table: String,

        /// Key type: integer or string
        #[arg(short, long, default_value = "integer")]
        key_type: String,
    },

    /// Print every record of a table
    ReadTable { database: String, table: String },

    /// Delete a table
    DeleteTable { database: String, table: String },

    /// Rename a table
    RenameTable {
        database: String,
        old: String,
        new: String,
    },

    /// Insert a record (JSON object); the key defaults to its "id" field
    CreateRecord {
        database: String,
        table: String,
        record: String,

        #[arg(short, long)]
        key: Option<String>,
    },

    /// Print one record
    ReadRecord {
        database: String,
        table: String,
        key: String,
    },

    /// Replace a record
    UpdateRecord {
        database: String,
        table: String,
        key: String,
        record: String,
    },

    /// Delete a record
    DeleteRecord {
        database: String,
        table: String,
        key: String,
    },

    /// Compact a table's segments
    CompactTable { database: String, table: String },
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::CreateDatabase { name } => Command::CreateDatabase { name },
            Commands::DeleteDatabase { name } => Command::DeleteDatabase { name },
            Commands::RenameDatabase { old, new } => Command::RenameDatabase { old, new },
            Commands::ListDatabase { name } => Command::ListDatabase { name },
            Commands::ListDatabases => Command::ListDatabases,
            Commands::CreateTable {
                database,
                table,
                key_type,
            } => Command::CreateTable {
                database,
                table,
                key_type,
            },
            Commands::ReadTable { database, table } => Command::ReadTable { database, table },
            Commands::DeleteTable { database, table } => Command::DeleteTable { database, table },
            Commands::RenameTable { database, old, new } => {
                Command::RenameTable { database, old, new }
            }
            Commands::CreateRecord {
                database,
                table,
                record,
                key,
            } => Command::CreateRecord {
                database,
                table,
                key,
                record,
            },
            Commands::ReadRecord {
                database,
                table,
                key,
            } => Command::ReadRecord {
                database,
                table,
                key,
            },
            Commands::UpdateRecord {
                database,
                table,
                key,
                record,
            } => Command::UpdateRecord {
                database,
                table,
                key,
                record,
            },
            Commands::DeleteRecord {
                database,
                table,
                key,
            } => Command::DeleteRecord {
                database,
                table,
                key,
            },
            Commands::CompactTable { database, table } => {
                Command::CompactTable { database, table }
            }
        }
    }
}

fn main() {
    // Logs go to stderr so they never mix with command output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::builder().root_dir(&args.root);
    if args.sync_every_write {
        config = config.sync_strategy(tablekv::SyncStrategy::EveryWrite);
    }

    let store = match Store::open(config.build()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: cannot open {}: {}", args.root, e);
            std::process::exit(1);
        }
    };

    match store.execute(args.command.into()) {
        Ok(output) => print_output(output),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_output(output: Output) {
    match output {
        Output::Done => println!("OK"),
        Output::Names(names) => {
            for name in names {
                println!("{}", name);
            }
        }
        Output::Record(record) => println!("{}", Value::Object(record)),
        Output::Records(records) => {
            for (_, record) in records {
                println!("{}", Value::Object(record));
            }
        }
        Output::Compacted(stats) => println!(
            "compacted {} segments: {} records kept, {} bytes reclaimed",
            stats.segments_removed,
            stats.records_copied,
            stats.bytes_reclaimed()
        ),
    }
}
