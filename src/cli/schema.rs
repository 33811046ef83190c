//! CLI implementation for the `salvage schema` subcommand.
//!
//! Prints the table catalog that `recover` carves against: each table's
//! root page, its columns, and the affinity derived from every declared
//! type. The JSON form can be saved and passed back to `recover --schema`
//! when no intact copy of the database is at hand.

use std::io::Write;

use colored::Colorize;

use crate::cli::{load_catalog, wprintln, SchemaSource};
use crate::sqlite::schema::SchemaCatalog;
use crate::SalvageError;

/// Options for the `salvage schema` subcommand.
pub struct SchemaOptions {
    /// Intact database to read the schema from.
    pub reference: Option<String>,
    /// Catalog JSON file.
    pub schema: Option<String>,
    /// Output in JSON format.
    pub json: bool,
}

/// Print the catalog loaded from `--reference` or `--schema`.
pub fn execute(opts: &SchemaOptions, writer: &mut dyn Write) -> Result<(), SalvageError> {
    let source = SchemaSource::from_args(opts.schema.as_deref(), opts.reference.as_deref(), None)?;
    let (catalog, warnings) = load_catalog(&source)?;

    if opts.json {
        wprintln!(writer, "{}", catalog.to_json()?)?;
        return Ok(());
    }

    print_catalog(writer, source.describe(), &catalog)?;
    for w in &warnings {
        wprintln!(writer, "{} {}", "Warning:".yellow(), w)?;
    }
    Ok(())
}

fn print_catalog(
    writer: &mut dyn Write,
    source: &str,
    catalog: &SchemaCatalog,
) -> Result<(), SalvageError> {
    wprintln!(writer, "Schema: {} ({} tables)", source, catalog.len())?;
    for table in catalog.tables() {
        wprintln!(writer)?;
        wprintln!(
            writer,
            "{} {} (root page {})",
            "Table".bold(),
            table.name.bold(),
            table.root_page
        )?;
        let alias = table.rowid_alias();
        for col in &table.columns {
            let mut flags = Vec::new();
            if col.is_primary_key {
                flags.push("PK");
            }
            if alias == Some(col.position) {
                flags.push("ROWID");
            }
            if col.not_null {
                flags.push("NOT NULL");
            }
            let declared = if col.declared_type.is_empty() {
                "-".to_string()
            } else {
                col.declared_type.clone()
            };
            wprintln!(
                writer,
                "  {:>3}  {:<24} {:<16} {:<8} {}",
                col.position,
                col.name,
                declared,
                col.affinity().name(),
                flags.join(" ").dimmed()
            )?;
        }
    }
    Ok(())
}
