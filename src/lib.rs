//! SQLite record carving toolkit.
//!
//! The `sqlite-salvage` crate (library name `salvage`) recovers deleted or
//! orphaned rows from SQLite database files. Instead of trusting the live
//! B-tree, it treats the file as a raw byte array and reconstructs records
//! wherever a plausible record header survives: in freed cells, in
//! unallocated space at the end of a page, and on pages no longer linked
//! into any tree.
//!
//! # CLI Reference
//!
//! | Command | Purpose |
//! |---------|---------|
//! | [`salvage recover`](cli::app::Commands::Recover) | Carve rows from every page using the table schemas |
//! | [`salvage schema`](cli::app::Commands::Schema) | Print the schema catalog (from an intact copy or a JSON file) |
//! | [`salvage info`](cli::app::Commands::Info) | Show header fields and the page-kind breakdown |
//! | [`salvage completions`](cli::app::Commands::Completions) | Generate shell completions |
//!
//! All subcommands accept `--color <auto|always|never>`, `--output <file>`, and
//! `--threads <n>`.
//!
//! # Library API
//!
//! ```no_run
//! use salvage::sqlite::database::DatabaseFile;
//! use salvage::sqlite::scan::{ScanOptions, Scanner, SkipAmbiguous};
//! use salvage::sqlite::schema::SchemaCatalog;
//!
//! let db = DatabaseFile::open("deleted.db").unwrap();
//! let catalog = SchemaCatalog::from_json(&std::fs::read_to_string("schema.json").unwrap()).unwrap();
//! let options = ScanOptions::default();
//!
//! let report = Scanner::new(&db, &catalog, &options).scan(&mut SkipAmbiguous);
//! for table in report.results.tables() {
//!     println!("{}: {} rows", table.name, table.intact.len());
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sqlite::varint`] | The two varint encodings read from record headers |
//! | [`sqlite::schema`] | Table schemas, column affinities, the schema catalog |
//! | [`sqlite::serial`] | Serial type mapping and header validation |
//! | [`sqlite::record`] | Payload value decoding and content filters |
//! | [`sqlite::carver`] | Byte-by-byte intact and corrupted-header row carving |
//! | [`sqlite::database`] | File header, page geometry, page tree heuristic |
//! | [`sqlite::page`] | Page spans and b-tree page kinds |
//! | [`sqlite::scan`] | Whole-file scan, ownership arbitration, result aggregation |
//! | [`sqlite::export`] | Row rendering (tuple, tab, CSV) |
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli` | on | Builds the `salvage` binary and its dependencies. |
//! | `sqlite` | off | Reads schemas and known rows from an intact copy via `rusqlite`. |

#[cfg(feature = "cli")]
pub mod cli;
pub mod sqlite;
pub mod util;

use thiserror::Error;

use crate::sqlite::record::TextFilter;

/// Errors returned by `salvage` operations.
#[derive(Error, Debug)]
pub enum SalvageError {
    /// An I/O error occurred (file open, read, map, or write failure).
    #[error("I/O error: {0}")]
    Io(String),

    /// A parse error occurred (malformed header, schema file, or JSON).
    #[error("Parse error: {0}")]
    Parse(String),

    /// An invalid argument was supplied (bad page size, unknown table, etc.).
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Fewer bytes remain than a decode requires.
    #[error("Truncated input: {needed} bytes needed at offset {offset}")]
    TruncatedInput { offset: usize, needed: usize },

    /// A record header failed decoding or validation.
    #[error("Invalid record header: {0}")]
    InvalidHeader(&'static str),

    /// A serial type code with no value mapping (10 and 11 are reserved).
    #[error("Unsupported serial type {0}")]
    UnsupportedSerialType(u64),

    /// A decoded value was rejected by a content filter.
    #[error("Value rejected by {0:?} filter")]
    RejectedContent(TextFilter),

    /// No schema is registered for the given root page.
    #[error("No schema for root page {0}")]
    SchemaNotFound(u32),
}
