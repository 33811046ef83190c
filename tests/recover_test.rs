#![cfg(feature = "cli")]
//! Integration tests for the `recover`, `schema`, and `info` subcommands.

use byteorder::{BigEndian, ByteOrder};
use std::io::Write;
use tempfile::NamedTempFile;

use salvage::cli::app::ConflictMode;
use salvage::cli::info::{self, InfoOptions};
use salvage::cli::recover::{self, RecoverOptions};
use salvage::cli::schema::{self, SchemaOptions};
use salvage::sqlite::export::ExportFormat;
use salvage::sqlite::schema::SchemaCatalog;
use salvage::SalvageError;

const PS: usize = 1024;

const CATALOG: &str = r#"[
  {
    "root_page": 2,
    "name": "people",
    "columns": [
      {"position": 0, "name": "id", "declared_type": "INTEGER", "not_null": false, "is_primary_key": true},
      {"position": 1, "name": "name", "declared_type": "TEXT", "not_null": true, "is_primary_key": false},
      {"position": 2, "name": "age", "declared_type": "INTEGER", "not_null": false, "is_primary_key": false}
    ]
  }
]"#;

fn put_person(data: &mut [u8], page: usize, offset: usize, name: &str, age: u8) {
    let mut record = vec![0x00, (13 + 2 * name.len()) as u8, 0x01];
    record.extend_from_slice(name.as_bytes());
    record.push(age);
    let start = (page - 1) * PS + offset;
    data[start..start + record.len()].copy_from_slice(&record);
}

fn write_temp(data: &[u8]) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("create temp file");
    tmp.write_all(data).expect("write temp file");
    tmp.flush().expect("flush");
    tmp
}

/// Four pages: header page, the `people` root, an orphaned page, and an
/// unused page.
fn database() -> NamedTempFile {
    let mut data = vec![0u8; PS * 4];
    data[..16].copy_from_slice(b"SQLite format 3\0");
    BigEndian::write_u16(&mut data[16..], PS as u16);
    BigEndian::write_u32(&mut data[56..], 1);
    data[100] = 13;
    data[PS] = 13;
    put_person(&mut data, 2, 300, "alice", 30);
    put_person(&mut data, 3, 200, "o'hara", 41);
    write_temp(&data)
}

fn options(db: &NamedTempFile, catalog: &NamedTempFile, format: ExportFormat) -> RecoverOptions {
    RecoverOptions {
        file: db.path().to_string_lossy().into_owned(),
        schema: Some(catalog.path().to_string_lossy().into_owned()),
        reference: None,
        tables: Vec::new(),
        corrupted: false,
        strict: false,
        ceiling: None,
        filters: Vec::new(),
        no_unknown: false,
        on_conflict: ConflictMode::Skip,
        format,
        include_known: false,
        page_size: None,
        mmap: false,
        verbose: false,
    }
}

fn run(opts: &RecoverOptions) -> Result<String, SalvageError> {
    let mut out = Vec::new();
    recover::execute(opts, &mut out)?;
    Ok(String::from_utf8(out).expect("utf-8 output"))
}

#[test]
fn test_recover_csv_lists_rows() {
    let db = database();
    let catalog = write_temp(CATALOG.as_bytes());
    let out = run(&options(&db, &catalog, ExportFormat::Csv)).unwrap();

    assert!(out.contains("id,name,age"));
    assert!(out.contains(",alice,30"));
    assert!(out.contains(",o'hara,41"));
    assert!(out.contains("2 intact, 0 corrupted, 2 pages"));
    assert!(out.contains("Stopped at page 4"));
}

#[test]
fn test_recover_raw_escapes_quotes() {
    let db = database();
    let catalog = write_temp(CATALOG.as_bytes());
    let out = run(&options(&db, &catalog, ExportFormat::Raw)).unwrap();
    assert!(out.contains("(NULL, 'alice', 30)"));
    assert!(out.contains("(NULL, 'o''hara', 41)"));
}

#[test]
fn test_recover_json_report() {
    let db = database();
    let catalog = write_temp(CATALOG.as_bytes());
    let out = run(&options(&db, &catalog, ExportFormat::Json)).unwrap();

    let json: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(json["page_size"], 1024);
    assert_eq!(json["page_count"], 4);
    assert!(json["timestamp"].is_string());
    let intact = json["results"]["2"]["intact"].as_array().unwrap();
    assert_eq!(intact.len(), 2);
    assert_eq!(intact[0]["values"][1], "alice");
    assert_eq!(intact[0]["start_offset"], PS + 300);
    assert_eq!(json["stopped_at_page"], 4);
    assert_eq!(json["cancelled"], false);
    assert!(json.get("catalog_warnings").is_none());
}

#[test]
fn test_recover_without_unknown_pass() {
    let db = database();
    let catalog = write_temp(CATALOG.as_bytes());
    let mut opts = options(&db, &catalog, ExportFormat::Tab);
    opts.no_unknown = true;
    let out = run(&opts).unwrap();
    assert!(out.contains("\talice\t30"));
    assert!(!out.contains("o'hara"));
}

#[test]
fn test_recover_verbose_shows_offsets_and_dump() {
    let db = database();
    let catalog = write_temp(CATALOG.as_bytes());
    let mut opts = options(&db, &catalog, ExportFormat::Raw);
    opts.verbose = true;
    opts.no_unknown = true;
    let out = run(&opts).unwrap();
    assert!(out.contains("[page 2 @ 1324 (0x52c)]"));
    assert!(out.contains("|...alice."));
}

#[test]
fn test_recover_rejects_unknown_table_and_filter() {
    let db = database();
    let catalog = write_temp(CATALOG.as_bytes());

    let mut opts = options(&db, &catalog, ExportFormat::Raw);
    opts.tables = vec!["nope".into()];
    assert!(matches!(run(&opts), Err(SalvageError::Argument(_))));

    let mut opts = options(&db, &catalog, ExportFormat::Raw);
    opts.filters = vec!["ascii-only".into()];
    assert!(matches!(run(&opts), Err(SalvageError::Argument(_))));
}

#[test]
fn test_recover_unknown_root_is_a_warning() {
    let db = database();
    let catalog = write_temp(CATALOG.as_bytes());
    let mut opts = options(&db, &catalog, ExportFormat::Raw);
    opts.tables = vec!["people".into(), "77".into()];
    let out = run(&opts).unwrap();
    assert!(out.contains("no schema for root page 77"));
    assert!(out.contains("(NULL, 'alice', 30)"));
}

#[test]
fn test_recover_missing_file_is_io_error() {
    let catalog = write_temp(CATALOG.as_bytes());
    let mut opts = options(&database(), &catalog, ExportFormat::Raw);
    opts.file = "/nonexistent/damaged.db".into();
    assert!(matches!(run(&opts), Err(SalvageError::Io(_))));
}

#[test]
fn test_schema_json_round_trips() {
    let catalog = write_temp(CATALOG.as_bytes());
    let mut out = Vec::new();
    schema::execute(
        &SchemaOptions {
            reference: None,
            schema: Some(catalog.path().to_string_lossy().into_owned()),
            json: true,
        },
        &mut out,
    )
    .unwrap();
    let printed = SchemaCatalog::from_json(&String::from_utf8(out).unwrap()).unwrap();
    assert_eq!(printed.to_json().unwrap(), SchemaCatalog::from_json(CATALOG).unwrap().to_json().unwrap());
}

#[test]
fn test_schema_text_shows_affinity() {
    let catalog = write_temp(CATALOG.as_bytes());
    let mut out = Vec::new();
    schema::execute(
        &SchemaOptions {
            reference: None,
            schema: Some(catalog.path().to_string_lossy().into_owned()),
            json: false,
        },
        &mut out,
    )
    .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("people"));
    assert!(text.contains("(root page 2)"));
    assert!(text.contains("INTEGER"));
    assert!(text.contains("ROWID"));
}

#[test]
fn test_info_json_histogram() {
    let db = database();
    let mut out = Vec::new();
    info::execute(
        &InfoOptions {
            file: db.path().to_string_lossy().into_owned(),
            verbose: true,
            json: true,
            page_size: None,
        },
        &mut out,
    )
    .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["page_count"], 4);
    assert_eq!(json["text_encoding"], "UTF-8");
    assert_eq!(json["page_kinds"]["LEAF_TABLE"], 2);
    assert_eq!(json["page_kinds"]["UNKNOWN"], 2);
    assert_eq!(json["pages"].as_array().unwrap().len(), 4);
    assert_eq!(json["header"]["magic_valid"], true);
}

#[test]
fn test_info_text_output() {
    let db = database();
    let mut out = Vec::new();
    info::execute(
        &InfoOptions {
            file: db.path().to_string_lossy().into_owned(),
            verbose: false,
            json: false,
            page_size: None,
        },
        &mut out,
    )
    .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("4 pages x 1024 bytes"));
    assert!(text.contains("LEAF_TABLE"));
}
