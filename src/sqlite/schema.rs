//! Table schemas and the schema catalog.
//!
//! The carver needs to know, for every table, the declared columns in order,
//! which of them are NOT NULL, and which form the primary key. This
//! information comes from an intact copy of the database (see
//! [`crate::util`] with the `sqlite` feature) or from a JSON file captured
//! earlier with `salvage schema --json`. The carver never reads it from the
//! damaged file.
//!
//! Each column's [`Affinity`] is derived from its declared type with the
//! substring rules of the SQLite type system.
//!
//! # Usage
//!
//! ```
//! use salvage::sqlite::schema::{Affinity, SchemaCatalog};
//!
//! let json = r#"[{"root_page": 2, "name": "messages", "columns": [
//!     {"position": 0, "name": "id", "declared_type": "INTEGER", "is_primary_key": true},
//!     {"position": 1, "name": "body", "declared_type": "TEXT"}
//! ]}]"#;
//! let catalog = SchemaCatalog::from_json(json).unwrap();
//! let table = catalog.lookup(2).unwrap();
//! assert_eq!(table.columns[1].affinity(), Affinity::Text);
//! assert_eq!(table.rowid_alias(), Some(0));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::SalvageError;

/// Column type affinity, derived from the declared type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Affinity {
    Integer,
    Text,
    /// BLOB or no declared type (SQLite calls this affinity NONE).
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    /// Derive the affinity of a declared column type.
    ///
    /// Rules are applied in order, case-insensitively: `int` → Integer;
    /// `char`, `text`, `clob` → Text; empty or `blob` → Blob; `real`,
    /// `floa`, `doub` → Real; anything else → Numeric.
    ///
    /// # Examples
    ///
    /// ```
    /// use salvage::sqlite::schema::Affinity;
    ///
    /// assert_eq!(Affinity::from_declared_type("BIGINT"), Affinity::Integer);
    /// assert_eq!(Affinity::from_declared_type("VARCHAR(20)"), Affinity::Text);
    /// assert_eq!(Affinity::from_declared_type(""), Affinity::Blob);
    /// assert_eq!(Affinity::from_declared_type("DOUBLE PRECISION"), Affinity::Real);
    /// assert_eq!(Affinity::from_declared_type("DECIMAL(10,2)"), Affinity::Numeric);
    /// // "POINT" contains "int", so it is an integer column
    /// assert_eq!(Affinity::from_declared_type("POINT"), Affinity::Integer);
    /// ```
    pub fn from_declared_type(declared_type: &str) -> Self {
        let t = declared_type.to_ascii_lowercase();
        if t.contains("int") {
            Affinity::Integer
        } else if t.contains("char") || t.contains("text") || t.contains("clob") {
            Affinity::Text
        } else if t.is_empty() || t.contains("blob") {
            Affinity::Blob
        } else if t.contains("real") || t.contains("floa") || t.contains("doub") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// Returns the SQL keyword for this affinity (NONE for blob affinity).
    pub fn name(&self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Text => "TEXT",
            Affinity::Blob => "NONE",
            Affinity::Real => "REAL",
            Affinity::Numeric => "NUMERIC",
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One declared column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Zero-based position in the declared column list.
    pub position: usize,
    /// Column name.
    pub name: String,
    /// Declared type as written in CREATE TABLE (may be empty).
    #[serde(default)]
    pub declared_type: String,
    /// Whether the column is declared NOT NULL.
    #[serde(default)]
    pub not_null: bool,
    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub is_primary_key: bool,
}

impl ColumnDef {
    /// Returns the affinity derived from the declared type.
    pub fn affinity(&self) -> Affinity {
        Affinity::from_declared_type(&self.declared_type)
    }

    /// Returns true if the column may hold NULL.
    pub fn nullable(&self) -> bool {
        !self.not_null
    }
}

/// A table definition, identified by its root page number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Root page of the table's b-tree (1-based).
    pub root_page: u32,
    /// Table name.
    pub name: String,
    /// Columns in declared order.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Number of declared columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of columns that belong to the primary key.
    pub fn pk_count(&self) -> usize {
        self.columns.iter().filter(|c| c.is_primary_key).count()
    }

    /// Index of the column aliasing the rowid, if any.
    ///
    /// A lone primary-key column declared exactly `INTEGER` is stored as
    /// NULL in the record, its value living in the cell's rowid instead.
    pub fn rowid_alias(&self) -> Option<usize> {
        if self.pk_count() != 1 {
            return None;
        }
        self.columns
            .iter()
            .position(|c| c.is_primary_key && c.declared_type.eq_ignore_ascii_case("integer"))
    }

    /// Returns true if the primary-key columns are exactly the leading columns.
    pub fn pk_is_prefix(&self) -> bool {
        let pk = self.pk_count();
        pk > 0 && self.columns[..pk].iter().all(|c| c.is_primary_key)
    }

    fn check(&self) -> Result<(), SalvageError> {
        if self.columns.is_empty() {
            return Err(SalvageError::Parse(format!(
                "Table {} (root {}) has no columns",
                self.name, self.root_page
            )));
        }
        if self.root_page == 0 {
            return Err(SalvageError::Parse(format!(
                "Table {} has root page 0",
                self.name
            )));
        }
        if let Some((i, col)) = self.columns.iter().enumerate().find(|(i, c)| c.position != *i) {
            return Err(SalvageError::Parse(format!(
                "Table {}: column {} has position {}, expected {}",
                self.name, col.name, col.position, i
            )));
        }
        Ok(())
    }
}

/// Table schemas keyed by root page.
///
/// Populated once before a scan and read concurrently afterwards.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<u32, TableSchema>,
}

impl SchemaCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store tables by root page. Loading the same root twice keeps the last one.
    ///
    /// Every table is checked first; if any is malformed the catalog is left
    /// unchanged.
    pub fn load<I>(&mut self, tables: I) -> Result<(), SalvageError>
    where
        I: IntoIterator<Item = TableSchema>,
    {
        let tables: Vec<TableSchema> = tables.into_iter().collect();
        for table in &tables {
            table.check()?;
        }
        for table in tables {
            self.tables.insert(table.root_page, table);
        }
        Ok(())
    }

    /// Parse a JSON array of [`TableSchema`] objects.
    pub fn from_json(json: &str) -> Result<Self, SalvageError> {
        let tables: Vec<TableSchema> = serde_json::from_str(json)
            .map_err(|e| SalvageError::Parse(format!("Invalid schema JSON: {}", e)))?;
        let mut catalog = Self::new();
        catalog.load(tables)?;
        Ok(catalog)
    }

    /// Serialize the catalog as a pretty-printed JSON array.
    pub fn to_json(&self) -> Result<String, SalvageError> {
        let tables: Vec<&TableSchema> = self.tables.values().collect();
        serde_json::to_string_pretty(&tables)
            .map_err(|e| SalvageError::Parse(format!("JSON serialization error: {}", e)))
    }

    /// Look up a table by root page.
    pub fn lookup(&self, root: u32) -> Result<&TableSchema, SalvageError> {
        self.tables.get(&root).ok_or(SalvageError::SchemaNotFound(root))
    }

    /// Look up a table by name (case-insensitive).
    pub fn lookup_name(&self, name: &str) -> Option<&TableSchema> {
        self.tables.values().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Affinity of a column.
    pub fn affinity_of(column: &ColumnDef) -> Affinity {
        column.affinity()
    }

    /// Iterate over tables in ascending root-page order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Root pages in ascending order.
    pub fn roots(&self) -> Vec<u32> {
        self.tables.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(position: usize, name: &str, ty: &str, not_null: bool, pk: bool) -> ColumnDef {
        ColumnDef {
            position,
            name: name.to_string(),
            declared_type: ty.to_string(),
            not_null,
            is_primary_key: pk,
        }
    }

    #[test]
    fn test_affinity_rules_in_order() {
        let cases = [
            ("INTEGER", Affinity::Integer),
            ("tinyint", Affinity::Integer),
            ("CHARACTER(20)", Affinity::Text),
            ("NVARCHAR(100)", Affinity::Text),
            ("TEXT", Affinity::Text),
            ("CLOB", Affinity::Text),
            ("BLOB", Affinity::Blob),
            ("", Affinity::Blob),
            ("REAL", Affinity::Real),
            ("FLOAT", Affinity::Real),
            ("DOUBLE", Affinity::Real),
            ("NUMERIC", Affinity::Numeric),
            ("BOOLEAN", Affinity::Numeric),
            ("DATETIME", Affinity::Numeric),
            // "int" wins over "char"
            ("CHARINT", Affinity::Integer),
            // "floating point" contains "int"
            ("FLOATING POINT", Affinity::Integer),
        ];
        for (ty, expected) in cases {
            assert_eq!(Affinity::from_declared_type(ty), expected, "type {:?}", ty);
        }
    }

    #[test]
    fn test_rowid_alias_detection() {
        let table = TableSchema {
            root_page: 2,
            name: "t".into(),
            columns: vec![
                column(0, "id", "INTEGER", false, true),
                column(1, "v", "TEXT", false, false),
            ],
        };
        assert_eq!(table.rowid_alias(), Some(0));
        assert!(table.pk_is_prefix());

        let int_not_integer = TableSchema {
            columns: vec![
                column(0, "id", "INT", false, true),
                column(1, "v", "TEXT", false, false),
            ],
            ..table.clone()
        };
        assert_eq!(int_not_integer.rowid_alias(), None);

        let composite = TableSchema {
            columns: vec![
                column(0, "a", "INTEGER", true, true),
                column(1, "b", "INTEGER", true, true),
                column(2, "v", "TEXT", false, false),
            ],
            ..table
        };
        assert_eq!(composite.rowid_alias(), None);
        assert_eq!(composite.pk_count(), 2);
        assert!(composite.pk_is_prefix());
    }

    #[test]
    fn test_pk_not_prefix() {
        let table = TableSchema {
            root_page: 3,
            name: "t".into(),
            columns: vec![
                column(0, "v", "TEXT", false, false),
                column(1, "id", "INTEGER", false, true),
            ],
        };
        assert!(!table.pk_is_prefix());
        assert_eq!(table.rowid_alias(), Some(1));
    }

    #[test]
    fn test_load_last_write_wins() {
        let mut catalog = SchemaCatalog::new();
        let first = TableSchema {
            root_page: 4,
            name: "old".into(),
            columns: vec![column(0, "a", "TEXT", false, false)],
        };
        let second = TableSchema {
            name: "new".into(),
            ..first.clone()
        };
        catalog.load([first, second]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup(4).unwrap().name, "new");
    }

    #[test]
    fn test_lookup_missing_root() {
        let catalog = SchemaCatalog::new();
        match catalog.lookup(9) {
            Err(SalvageError::SchemaNotFound(9)) => {}
            other => panic!("expected SchemaNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_empty_table() {
        let mut catalog = SchemaCatalog::new();
        let empty = TableSchema {
            root_page: 2,
            name: "empty".into(),
            columns: Vec::new(),
        };
        assert!(catalog.load([empty]).is_err());
    }

    #[test]
    fn test_failed_load_leaves_catalog_unchanged() {
        let mut catalog = SchemaCatalog::new();
        let kept = TableSchema {
            root_page: 2,
            name: "kept".into(),
            columns: vec![column(0, "a", "TEXT", false, false)],
        };
        catalog.load([kept.clone()]).unwrap();

        let good = TableSchema {
            root_page: 5,
            name: "good".into(),
            columns: vec![column(0, "b", "TEXT", false, false)],
        };
        let bad = TableSchema {
            root_page: 6,
            name: "bad".into(),
            columns: Vec::new(),
        };
        assert!(catalog.load([good, bad]).is_err());
        assert_eq!(catalog.roots(), vec![2]);
        assert_eq!(catalog.lookup(2).unwrap(), &kept);
    }

    #[test]
    fn test_load_rejects_out_of_order_positions() {
        let mut catalog = SchemaCatalog::new();
        let swapped = TableSchema {
            root_page: 2,
            name: "swapped".into(),
            columns: vec![
                column(1, "b", "TEXT", false, false),
                column(0, "a", "TEXT", false, false),
            ],
        };
        match catalog.load([swapped]) {
            Err(SalvageError::Parse(msg)) => assert!(msg.contains("position 1, expected 0")),
            other => panic!("expected Parse error, got {:?}", other),
        }
        assert!(catalog.is_empty());

        let gap = r#"[{"root_page": 3, "name": "g", "columns": [
            {"position": 0, "name": "a"}, {"position": 2, "name": "c"}]}]"#;
        assert!(SchemaCatalog::from_json(gap).is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_order() {
        let json = r#"[
            {"root_page": 7, "name": "b", "columns": [{"position": 0, "name": "x", "declared_type": "REAL", "not_null": true}]},
            {"root_page": 3, "name": "a", "columns": [{"position": 0, "name": "y"}]}
        ]"#;
        let catalog = SchemaCatalog::from_json(json).unwrap();
        assert_eq!(catalog.roots(), vec![3, 7]);
        assert_eq!(catalog.lookup(3).unwrap().columns[0].affinity(), Affinity::Blob);
        assert!(catalog.lookup(7).unwrap().columns[0].not_null);

        let again = SchemaCatalog::from_json(&catalog.to_json().unwrap()).unwrap();
        assert_eq!(again.lookup(7).unwrap(), catalog.lookup(7).unwrap());
        assert_eq!(again.lookup_name("A").unwrap().root_page, 3);
    }
}
