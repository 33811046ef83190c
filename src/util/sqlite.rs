//! Reading schemas and live rows from an intact reference database.
//!
//! Carving needs each table's columns and root page, and the recover command
//! can hide rows that are still present in the live tables. Both come from an
//! undamaged copy of the database, opened read-only through `rusqlite`.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use crate::sqlite::record::DecodedValue;
use crate::sqlite::scan::KnownRowSet;
use crate::sqlite::schema::{ColumnDef, SchemaCatalog, TableSchema};
use crate::SalvageError;

/// Open a reference database read-only.
pub fn open_reference(path: &Path) -> Result<Connection, SalvageError> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| SalvageError::Io(format!("Cannot open {}: {}", path.display(), e)))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Read every table's root page and columns.
///
/// Returns the catalog and one warning per table whose columns could not be
/// read. Virtual tables (root page 0) are left out.
pub fn load_catalog(conn: &Connection) -> Result<(SchemaCatalog, Vec<String>), SalvageError> {
    let mut stmt = conn
        .prepare("SELECT name, rootpage FROM sqlite_master WHERE type = 'table' AND rootpage > 0")
        .map_err(|e| SalvageError::Parse(format!("Cannot query sqlite_master: {}", e)))?;
    let entries: Vec<(String, u32)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .and_then(|rows| rows.collect())
        .map_err(|e| SalvageError::Parse(format!("Cannot read sqlite_master: {}", e)))?;

    let mut tables = Vec::new();
    let mut warnings = Vec::new();
    for (name, root_page) in entries {
        match table_columns(conn, &name) {
            Ok(columns) if !columns.is_empty() => tables.push(TableSchema {
                root_page,
                name,
                columns,
            }),
            Ok(_) => warnings.push(format!("table {} has no columns", name)),
            Err(e) => warnings.push(format!("table {}: {}", name, e)),
        }
    }

    for w in &warnings {
        tracing::warn!("{}", w);
    }

    let mut catalog = SchemaCatalog::new();
    catalog.load(tables)?;
    tracing::info!(tables = catalog.len(), "loaded reference schema");
    Ok((catalog, warnings))
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnDef>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let cid: i64 = row.get(0)?;
        let declared_type: Option<String> = row.get(2)?;
        let not_null: i64 = row.get(3)?;
        let pk: i64 = row.get(5)?;
        Ok(ColumnDef {
            position: cid as usize,
            name: row.get(1)?,
            declared_type: declared_type.unwrap_or_default(),
            not_null: not_null != 0,
            is_primary_key: pk > 0,
        })
    })?;
    rows.collect()
}

fn to_decoded(value: ValueRef<'_>) -> DecodedValue {
    match value {
        ValueRef::Null => DecodedValue::Null,
        ValueRef::Integer(n) => DecodedValue::Integer(n),
        ValueRef::Real(r) => DecodedValue::Real(r),
        ValueRef::Text(t) => DecodedValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => DecodedValue::Blob(b.to_vec()),
    }
}

/// Read the live rows of every table in `catalog`.
///
/// Tables that cannot be read are skipped with a warning.
pub fn load_known_rows(conn: &Connection, catalog: &SchemaCatalog) -> KnownRowSet {
    let mut known = KnownRowSet::new();
    for schema in catalog.tables() {
        if let Err(e) = read_table(conn, schema, &mut known) {
            tracing::warn!(table = %schema.name, error = %e, "cannot read live rows");
        }
    }
    tracing::info!(rows = known.len(), "loaded live rows");
    known
}

fn read_table(conn: &Connection, schema: &TableSchema, known: &mut KnownRowSet) -> rusqlite::Result<()> {
    let columns: Vec<String> = schema.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let sql = format!("SELECT {} FROM {}", columns.join(", "), quote_ident(&schema.name));
    let mut stmt = conn.prepare(&sql)?;
    let width = columns.len();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_decoded(row.get_ref(i)?));
        }
        known.insert(schema, &values);
    }
    Ok(())
}
