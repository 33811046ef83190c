//! CLI subcommand implementations for the `salvage` binary.
//!
//! Argument parsing uses clap derive macros. The top-level [`app::Cli`]
//! struct and [`app::Commands`] enum live in [`app`] and are shared between
//! `main.rs` and `build.rs` (for man page generation) via `include!()`.
//!
//! Each subcommand module follows the same pattern: an `Options` struct
//! holding the parsed arguments and a
//! `pub fn execute(opts, writer) -> Result<(), SalvageError>` entry point.
//! The `writer: &mut dyn Write` parameter lets tests capture output and lets
//! the global `--output` flag redirect it to a file.
//!
//! # Subcommands
//!
//! | Command | Module | Purpose |
//! |---------|--------|---------|
//! | `salvage recover` | [`recover`] | Carve intact and corrupted rows out of a database file |
//! | `salvage schema` | [`schema`] | Print the table catalog used for carving |
//! | `salvage info` | [`info`] | Show header fields and a page-kind histogram |
//!
//! The `wprintln!` and `wprint!` macros wrap `writeln!`/`write!` to convert
//! `io::Error` into `SalvageError`.

pub mod app;
pub mod info;
pub mod recover;
pub mod schema;

/// Write a line to the given writer, converting io::Error to SalvageError.
macro_rules! wprintln {
    ($w:expr) => {
        writeln!($w).map_err(|e| $crate::SalvageError::Io(e.to_string()))
    };
    ($w:expr, $($arg:tt)*) => {
        writeln!($w, $($arg)*).map_err(|e| $crate::SalvageError::Io(e.to_string()))
    };
}

/// Write (without newline) to the given writer, converting io::Error to SalvageError.
macro_rules! wprint {
    ($w:expr, $($arg:tt)*) => {
        write!($w, $($arg)*).map_err(|e| $crate::SalvageError::Io(e.to_string()))
    };
}

pub(crate) use wprint;
pub(crate) use wprintln;

use std::path::Path;

use crate::sqlite::database::DatabaseFile;
use crate::sqlite::schema::SchemaCatalog;
use crate::SalvageError;
use indicatif::{ProgressBar, ProgressStyle};

/// Open a database file, selecting mmap or buffered I/O based on the flag.
///
/// When `page_size` is `Some`, the header's page size is ignored.
pub(crate) fn open_database(
    path: &str,
    page_size: Option<u32>,
    use_mmap: bool,
) -> Result<DatabaseFile, SalvageError> {
    match (use_mmap, page_size) {
        (true, ps) => DatabaseFile::open_mmap(path, ps),
        (false, Some(ps)) => DatabaseFile::open_with_page_size(path, ps),
        (false, None) => DatabaseFile::open(path),
    }
}

/// Where a command takes its table catalog from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// A JSON catalog as written by `salvage schema --json`.
    Json(String),
    /// An intact database opened read-only (requires the `sqlite` feature).
    Reference(String),
}

impl SchemaSource {
    /// Pick a source from the `--schema` / `--reference` pair, falling back
    /// to `fallback` as a reference database when neither is given.
    pub fn from_args(
        schema: Option<&str>,
        reference: Option<&str>,
        fallback: Option<&str>,
    ) -> Result<Self, SalvageError> {
        match (schema, reference, fallback) {
            (Some(_), Some(_), _) => Err(SalvageError::Argument(
                "--schema and --reference cannot be used together".to_string(),
            )),
            (Some(s), None, _) => Ok(SchemaSource::Json(s.to_string())),
            (None, Some(r), _) => Ok(SchemaSource::Reference(r.to_string())),
            (None, None, Some(f)) => Ok(SchemaSource::Reference(f.to_string())),
            (None, None, None) => Err(SalvageError::Argument(
                "A schema source is required: pass --schema or --reference".to_string(),
            )),
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            SchemaSource::Json(p) | SchemaSource::Reference(p) => p,
        }
    }
}

/// Load a catalog and any warnings raised while reading it.
pub(crate) fn load_catalog(source: &SchemaSource) -> Result<(SchemaCatalog, Vec<String>), SalvageError> {
    match source {
        SchemaSource::Json(path) => {
            let json = std::fs::read_to_string(Path::new(path))
                .map_err(|e| SalvageError::Io(format!("Cannot read {}: {}", path, e)))?;
            Ok((SchemaCatalog::from_json(&json)?, Vec::new()))
        }
        SchemaSource::Reference(path) => load_reference_catalog(path),
    }
}

#[cfg(feature = "sqlite")]
fn load_reference_catalog(path: &str) -> Result<(SchemaCatalog, Vec<String>), SalvageError> {
    let conn = crate::util::sqlite::open_reference(Path::new(path))?;
    crate::util::sqlite::load_catalog(&conn)
}

#[cfg(not(feature = "sqlite"))]
fn load_reference_catalog(path: &str) -> Result<(SchemaCatalog, Vec<String>), SalvageError> {
    Err(SalvageError::Argument(format!(
        "Reading the schema of {} requires the `sqlite` feature; pass --schema <catalog.json> instead",
        path
    )))
}

/// Create a styled progress bar for iterating over pages.
pub(crate) fn create_progress_bar(count: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(count);
    let template = format!(
        "{{spinner:.green}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{eta}})",
        unit
    );
    if let Ok(style) = ProgressStyle::default_bar().template(&template) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
