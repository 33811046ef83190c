//! CLI implementation for the `salvage recover` subcommand.
//!
//! Loads a table catalog, carves the database file with a [`Scanner`], and
//! prints every recovered row in the requested format. Pages claimed by
//! several tables are settled by the `--on-conflict` policy; in `prompt` mode
//! the user picks the owner interactively. Ctrl+C stops the scan between
//! pages and the rows merged so far are still printed.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use colored::Colorize;
use serde::Serialize;

use crate::cli::app::ConflictMode;
use crate::cli::{create_progress_bar, load_catalog, open_database, wprint, wprintln, SchemaSource};
use crate::sqlite::carver::{CandidateRow, CarveOptions};
use crate::sqlite::database::DatabaseFile;
use crate::sqlite::export::{column_names, render_raw, ExportFormat};
use crate::sqlite::record::TextFilter;
use crate::sqlite::scan::{
    FirstCandidate, KnownRowSet, OwnershipCandidate, OwnershipResolver, ScanOptions, ScanReport,
    Scanner, SkipAmbiguous, TableRecovery,
};
use crate::sqlite::schema::SchemaCatalog;
use crate::util::hex::{format_offset, hex_dump};
use crate::SalvageError;

/// Options for the `salvage recover` subcommand.
pub struct RecoverOptions {
    /// Path to the database file to carve.
    pub file: String,
    /// Catalog JSON written by `salvage schema --json`.
    pub schema: Option<String>,
    /// Intact copy to read the schema and live rows from.
    pub reference: Option<String>,
    /// Restrict recovery to these tables (names or root pages).
    pub tables: Vec<String>,
    /// Run the corrupted-header pass.
    pub corrupted: bool,
    /// Use strict serial/affinity validation.
    pub strict: bool,
    /// Override the serial type sanity ceiling.
    pub ceiling: Option<u64>,
    /// Content filter names; empty keeps the default set.
    pub filters: Vec<String>,
    /// Skip the unknown-page pass.
    pub no_unknown: bool,
    /// How to settle pages claimed by several tables.
    pub on_conflict: ConflictMode,
    /// Output format for recovered rows.
    pub format: ExportFormat,
    /// Keep rows that are still present in the live tables.
    pub include_known: bool,
    /// Override the page size from the header.
    pub page_size: Option<u32>,
    /// Use memory-mapped I/O for file access.
    pub mmap: bool,
    /// Show row offsets and hex dumps.
    pub verbose: bool,
}

#[derive(Serialize)]
struct RecoverJson<'a> {
    file: &'a str,
    timestamp: String,
    schema_source: &'a str,
    page_size: u32,
    page_count: u32,
    text_encoding: &'static str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    catalog_warnings: &'a [String],
    #[serde(flatten)]
    report: &'a ScanReport,
}

/// Asks on a terminal which table owns an ambiguous page.
///
/// Candidates are listed by index; `-1` or an empty line leaves the page
/// unattributed. Invalid answers are asked again until input runs out.
pub struct PromptResolver<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptResolver<R, W> {
    pub fn new(input: R, output: W) -> Self {
        PromptResolver { input, output }
    }

    fn ask(&mut self, page: u32, candidates: &[OwnershipCandidate]) -> std::io::Result<Option<u32>> {
        writeln!(self.output, "Page {} matches {} tables:", page, candidates.len())?;
        for (i, c) in candidates.iter().enumerate() {
            writeln!(
                self.output,
                "  [{}] {} (root {}): {}",
                i,
                c.name,
                c.root,
                render_raw(&c.sample.values)
            )?;
        }
        loop {
            write!(self.output, "Owner index (-1 to skip): ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let answer = line.trim();
            if answer.is_empty() || answer == "-1" {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(i) if i < candidates.len() => return Ok(Some(candidates[i].root)),
                _ => writeln!(self.output, "Enter a number from 0 to {}", candidates.len() - 1)?,
            }
        }
    }
}

impl<R: BufRead, W: Write> OwnershipResolver for PromptResolver<R, W> {
    fn resolve(&mut self, page: u32, candidates: &[OwnershipCandidate]) -> Option<u32> {
        match self.ask(page, candidates) {
            Ok(choice) => choice,
            Err(e) => {
                tracing::warn!(page, error = %e, "prompt failed, leaving page unattributed");
                None
            }
        }
    }
}

/// Flag set by Ctrl+C. The handler can only be installed once per process.
fn cancel_flag() -> Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    let flag = FLAG.get_or_init(|| {
        let flag = Arc::new(AtomicBool::new(false));
        let f = flag.clone();
        if let Err(e) = ctrlc::set_handler(move || f.store(true, Ordering::SeqCst)) {
            tracing::warn!(error = %e, "cannot set Ctrl+C handler");
        }
        flag
    });
    flag.store(false, Ordering::SeqCst);
    flag.clone()
}

fn resolve_tables(catalog: &SchemaCatalog, tables: &[String]) -> Result<Option<Vec<u32>>, SalvageError> {
    if tables.is_empty() {
        return Ok(None);
    }
    tables
        .iter()
        .map(|t| match t.parse::<u32>() {
            Ok(root) => Ok(root),
            Err(_) => catalog
                .lookup_name(t)
                .map(|s| s.root_page)
                .ok_or_else(|| SalvageError::Argument(format!("Unknown table '{}'", t))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn scan_options(opts: &RecoverOptions) -> Result<ScanOptions, SalvageError> {
    let mut carve = CarveOptions {
        strict_validation: opts.strict,
        attempt_corrupted_rows: opts.corrupted,
        ..CarveOptions::default()
    };
    if let Some(ceiling) = opts.ceiling {
        carve.sanity_ceiling = ceiling;
    }
    if !opts.filters.is_empty() {
        carve.text_filters = opts
            .filters
            .iter()
            .map(|f| TextFilter::parse(f))
            .collect::<Result<_, _>>()?;
    }
    Ok(ScanOptions {
        carve,
        scan_unknown_pages: !opts.no_unknown,
        ..ScanOptions::default()
    })
}

#[cfg(feature = "sqlite")]
fn load_known(source: &SchemaSource, catalog: &SchemaCatalog) -> Result<Option<KnownRowSet>, SalvageError> {
    match source {
        SchemaSource::Reference(path) => {
            let conn = crate::util::sqlite::open_reference(Path::new(path))?;
            Ok(Some(crate::util::sqlite::load_known_rows(&conn, catalog)))
        }
        SchemaSource::Json(_) => Ok(None),
    }
}

#[cfg(not(feature = "sqlite"))]
fn load_known(source: &SchemaSource, _catalog: &SchemaCatalog) -> Result<Option<KnownRowSet>, SalvageError> {
    if let SchemaSource::Reference(path) = source {
        tracing::debug!(path = %Path::new(path).display(), "live rows need the sqlite feature");
    }
    Ok(None)
}

/// Carve the database and print the recovered rows.
pub fn execute(opts: &RecoverOptions, writer: &mut dyn Write) -> Result<(), SalvageError> {
    let fallback = if cfg!(feature = "sqlite") {
        Some(opts.file.as_str())
    } else {
        None
    };
    let source = SchemaSource::from_args(opts.schema.as_deref(), opts.reference.as_deref(), fallback)?;
    let (catalog, catalog_warnings) = load_catalog(&source)?;
    if catalog.is_empty() {
        return Err(SalvageError::Argument(format!(
            "No tables found in {}",
            source.describe()
        )));
    }
    let roots = resolve_tables(&catalog, &opts.tables)?;
    let scan_opts = scan_options(opts)?;

    let db = open_database(&opts.file, opts.page_size, opts.mmap)?;
    let known = if opts.include_known {
        None
    } else {
        load_known(&source, &catalog)?
    };

    let pb = if opts.format != ExportFormat::Json && opts.on_conflict != ConflictMode::Prompt {
        Some(create_progress_bar(db.page_count() as u64, "pages"))
    } else {
        None
    };

    let mut scanner = Scanner::new(&db, &catalog, &scan_opts).with_cancel(cancel_flag());
    if let Some(known) = &known {
        scanner = scanner.with_known(known);
    }
    if let Some(roots) = roots {
        scanner = scanner.with_roots(roots);
    }
    if let Some(bar) = pb.clone() {
        scanner = scanner.with_progress(move |_phase, done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        });
    }

    let mut resolver: Box<dyn OwnershipResolver> = match opts.on_conflict {
        ConflictMode::Skip => Box::new(SkipAmbiguous),
        ConflictMode::First => Box::new(FirstCandidate),
        ConflictMode::Prompt => Box::new(PromptResolver::new(
            std::io::stdin().lock(),
            std::io::stderr(),
        )),
    };
    let report = scanner.scan(resolver.as_mut());

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if opts.format == ExportFormat::Json {
        let out = RecoverJson {
            file: &opts.file,
            timestamp: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.3f%:z")
                .to_string(),
            schema_source: source.describe(),
            page_size: db.page_size(),
            page_count: db.page_count(),
            text_encoding: db.text_encoding().name(),
            catalog_warnings: &catalog_warnings,
            report: &report,
        };
        let json = serde_json::to_string_pretty(&out)
            .map_err(|e| SalvageError::Parse(format!("JSON serialization error: {}", e)))?;
        wprintln!(writer, "{}", json)?;
        return Ok(());
    }

    output_text(opts, &db, &catalog, &source, &catalog_warnings, &report, writer)
}

fn output_text(
    opts: &RecoverOptions,
    db: &DatabaseFile,
    catalog: &SchemaCatalog,
    source: &SchemaSource,
    catalog_warnings: &[String],
    report: &ScanReport,
    writer: &mut dyn Write,
) -> Result<(), SalvageError> {
    wprintln!(writer, "Recovery: {}", opts.file)?;
    wprintln!(writer, "Schema:   {} ({} tables)", source.describe(), catalog.len())?;
    wprintln!(
        writer,
        "Pages:    {} x {} bytes, {}",
        db.page_count(),
        db.page_size(),
        db.text_encoding().name()
    )?;

    for table in report.results.tables() {
        wprintln!(writer)?;
        print_table(opts, db, catalog, table, writer)?;
    }

    if !report.ambiguous.is_empty() {
        wprintln!(writer)?;
        wprintln!(writer, "{}", "Ambiguous Pages".bold())?;
        for a in &report.ambiguous {
            let names: Vec<String> = a
                .candidates
                .iter()
                .map(|c| format!("{} ({})", c.name, c.root))
                .collect();
            let chosen = match a.chosen {
                Some(root) => format!("attributed to root {}", root).green(),
                None => "not attributed".yellow(),
            };
            wprintln!(writer, "  Page {}: {} -> {}", a.page, names.join(", "), chosen)?;
        }
    }

    for w in catalog_warnings {
        wprintln!(writer, "{} {}", "Warning:".yellow(), w)?;
    }
    for w in &report.warnings {
        wprintln!(writer, "{} {}", "Warning:".yellow(), w)?;
    }
    for f in &report.failures {
        wprintln!(writer, "{} page {}: {}", "Failed:".red(), f.page, f.error)?;
    }

    wprintln!(writer)?;
    wprintln!(writer, "{}", "Summary".bold())?;
    wprintln!(
        writer,
        "  Rows:          {} intact, {} corrupted",
        report.results.total_intact(),
        report.results.total_corrupted()
    )?;
    wprintln!(
        writer,
        "  Pages:         {} carved, {} skipped",
        report.pages_scanned,
        report.pages_skipped
    )?;
    wprintln!(writer, "  Offsets tried: {}", report.stats.offsets_tried)?;
    if report.suppressed_known > 0 {
        wprintln!(writer, "  Known rows:    {} hidden", report.suppressed_known)?;
    }
    if let Some(page) = report.stopped_at_page {
        wprintln!(writer, "  Stopped at page {} (zero-filled tail)", page)?;
    }
    if report.cancelled {
        wprintln!(writer, "  {}", "Scan cancelled; results are partial".yellow())?;
    }
    Ok(())
}

fn print_table(
    opts: &RecoverOptions,
    db: &DatabaseFile,
    catalog: &SchemaCatalog,
    table: &TableRecovery,
    writer: &mut dyn Write,
) -> Result<(), SalvageError> {
    wprintln!(
        writer,
        "{} {} (root page {}): {} intact, {} corrupted, {} pages",
        "Table".bold(),
        table.name.bold(),
        table.root,
        table.intact.len(),
        table.corrupted.len(),
        table.pages.len()
    )?;
    let schema = catalog.lookup(table.root)?;

    if !table.intact.is_empty() {
        if let Some(header) = opts.format.header(&column_names(schema, false)) {
            wprintln!(writer, "{}", header.dimmed())?;
        }
        for row in &table.intact {
            print_row(opts, db, row, writer)?;
        }
    }

    if !table.corrupted.is_empty() {
        wprintln!(writer, "  {}", "Rows with overwritten key columns".yellow())?;
        if let Some(header) = opts.format.header(&column_names(schema, true)) {
            wprintln!(writer, "{}", header.dimmed())?;
        }
        for group in &table.corrupted {
            wprintln!(
                writer,
                "  -- header at {} on page {}, {} alternatives",
                format_offset(group.header_offset as u64),
                group.page,
                group.alternatives.len()
            )?;
            for row in &group.alternatives {
                print_row(opts, db, row, writer)?;
            }
        }
    }
    Ok(())
}

fn print_row(
    opts: &RecoverOptions,
    db: &DatabaseFile,
    row: &CandidateRow,
    writer: &mut dyn Write,
) -> Result<(), SalvageError> {
    if opts.verbose {
        wprint!(
            writer,
            "{} ",
            format!("[page {} @ {}]", row.page, format_offset(row.start_offset as u64)).dimmed()
        )?;
    }
    wprintln!(writer, "{}", opts.format.render(&row.values))?;
    if opts.verbose {
        if let Some(bytes) = db.data().get(row.start_offset..row.end_offset) {
            for line in hex_dump(bytes, row.start_offset as u64).lines() {
                wprintln!(writer, "    {}", line)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::record::DecodedValue;
    use std::io::Cursor;

    fn candidates() -> Vec<OwnershipCandidate> {
        [(2, "people"), (3, "books")]
            .into_iter()
            .map(|(root, name)| OwnershipCandidate {
                root,
                name: name.to_string(),
                sample: CandidateRow {
                    table_root: root,
                    page: 9,
                    start_offset: 0,
                    end_offset: 3,
                    values: vec![DecodedValue::Text("A".into())],
                },
            })
            .collect()
    }

    #[test]
    fn test_prompt_picks_index() {
        let mut out = Vec::new();
        let mut r = PromptResolver::new(Cursor::new("1\n"), &mut out);
        assert_eq!(r.resolve(9, &candidates()), Some(3));
        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("Page 9 matches 2 tables"));
        assert!(shown.contains("[0] people (root 2): ('A')"));
    }

    #[test]
    fn test_prompt_retries_and_skips() {
        let mut out = Vec::new();
        let mut r = PromptResolver::new(Cursor::new("7\nx\n-1\n"), &mut out);
        assert_eq!(r.resolve(9, &candidates()), None);
        let shown = String::from_utf8(out).unwrap();
        assert_eq!(shown.matches("Enter a number from 0 to 1").count(), 2);

        let mut eof = PromptResolver::new(Cursor::new(""), Vec::new());
        assert_eq!(eof.resolve(9, &candidates()), None);
    }

    #[test]
    fn test_catalog_warnings_only_in_json_when_present() {
        let report = ScanReport::default();
        let render = |warnings: &[String]| {
            serde_json::to_value(RecoverJson {
                file: "damaged.db",
                timestamp: String::new(),
                schema_source: "catalog.json",
                page_size: 4096,
                page_count: 1,
                text_encoding: "UTF-8",
                catalog_warnings: warnings,
                report: &report,
            })
            .unwrap()
        };
        assert!(render(&[]).get("catalog_warnings").is_none());
        let json = render(&["table t: no such table".to_string()]);
        assert_eq!(json["catalog_warnings"][0], "table t: no such table");
        assert_eq!(json["cancelled"], false);
    }

    #[test]
    fn test_resolve_tables_by_name_or_root() {
        let catalog = SchemaCatalog::from_json(
            r#"[{"root_page": 4, "name": "notes", "columns": [
                {"position": 0, "name": "body", "declared_type": "TEXT",
                 "not_null": false, "is_primary_key": false}]}]"#,
        )
        .unwrap();
        assert_eq!(resolve_tables(&catalog, &[]).unwrap(), None);
        assert_eq!(
            resolve_tables(&catalog, &["NOTES".into(), "9".into()]).unwrap(),
            Some(vec![4, 9])
        );
        assert!(resolve_tables(&catalog, &["missing".into()]).is_err());
    }
}
