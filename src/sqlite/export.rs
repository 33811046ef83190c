//! Rendering carved rows as text.
//!
//! Three line formats are supported: a SQL-literal tuple (`raw`), tab
//! separated values with escaped control characters (`tab`), and RFC 4180
//! CSV (`csv`). JSON output goes through serde on the report types instead.

use crate::sqlite::record::DecodedValue;
use crate::sqlite::schema::TableSchema;
use crate::util::hex::format_bytes;

/// Output format for recovered rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Raw,
    Tab,
    Csv,
    Json,
}

impl ExportFormat {
    /// Render one row in this format. JSON rows are rendered as arrays.
    pub fn render(&self, values: &[DecodedValue]) -> String {
        match self {
            ExportFormat::Raw => render_raw(values),
            ExportFormat::Tab => render_tab(values),
            ExportFormat::Csv => render_csv(values),
            ExportFormat::Json => serde_json::to_string(values).unwrap_or_default(),
        }
    }

    /// Render a header line of column names, if the format has one.
    pub fn header(&self, names: &[&str]) -> Option<String> {
        match self {
            ExportFormat::Tab => Some(names.join("\t")),
            ExportFormat::Csv => Some(
                names
                    .iter()
                    .map(|n| escape_csv_str(n))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ExportFormat::Raw | ExportFormat::Json => None,
        }
    }
}

/// Column names in row order. Corrupted-header rows omit the key columns.
pub fn column_names(schema: &TableSchema, corrupted: bool) -> Vec<&str> {
    let skip = if corrupted { schema.pk_count() } else { 0 };
    schema.columns[skip..].iter().map(|c| c.name.as_str()).collect()
}

/// Render a value as a SQL literal.
///
/// # Examples
///
/// ```
/// use salvage::sqlite::export::sql_literal;
/// use salvage::sqlite::record::DecodedValue;
///
/// assert_eq!(sql_literal(&DecodedValue::Text("it's".into())), "'it''s'");
/// assert_eq!(sql_literal(&DecodedValue::Blob(vec![0xca, 0xfe])), "x'cafe'");
/// assert_eq!(sql_literal(&DecodedValue::Null), "NULL");
/// ```
pub fn sql_literal(value: &DecodedValue) -> String {
    match value {
        DecodedValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

/// `(v1, v2, ...)` with SQL literals.
pub fn render_raw(values: &[DecodedValue]) -> String {
    let parts: Vec<String> = values.iter().map(sql_literal).collect();
    format!("({})", parts.join(", "))
}

/// Tab-separated values; NULL is empty, tabs and newlines are escaped.
pub fn render_tab(values: &[DecodedValue]) -> String {
    values
        .iter()
        .map(|v| match v {
            DecodedValue::Null => String::new(),
            DecodedValue::Text(s) => s
                .replace('\\', "\\\\")
                .replace('\t', "\\t")
                .replace('\n', "\\n")
                .replace('\r', "\\r"),
            DecodedValue::Blob(b) => format_bytes(b),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}

/// Escape a value for CSV output.
pub fn csv_escape(value: &DecodedValue) -> String {
    match value {
        DecodedValue::Null => String::new(),
        DecodedValue::Integer(n) => n.to_string(),
        DecodedValue::Real(r) => r.to_string(),
        DecodedValue::Text(s) => escape_csv_str(s),
        DecodedValue::Blob(b) => format_bytes(b),
    }
}

fn escape_csv_str(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn render_csv(values: &[DecodedValue]) -> String {
    values.iter().map(csv_escape).collect::<Vec<_>>().join(",")
}
