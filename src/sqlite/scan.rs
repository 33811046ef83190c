//! Whole-file scan orchestration.
//!
//! A [`Scanner`] runs two passes over a [`DatabaseFile`]:
//!
//! 1. **Known pass.** For every table, the root page and the pages it appears
//!    to reference ([`DatabaseFile::pages_for_root`]) are carved with that
//!    table's schema. These pages are then considered done.
//! 2. **Unknown pass.** Every remaining page from
//!    [`ScanOptions::first_unknown_page`] upward is carved against *every*
//!    schema. A page matched by exactly one table is attributed to it. A page
//!    matched by several tables is an ownership conflict: it is set aside with
//!    its carves and handed to an [`OwnershipResolver`] once the pass is over,
//!    so a resolver that waits on a user holds up only those pages. A page
//!    matched by none whose tail is all zeros ends the pass, since it usually
//!    marks the start of never-used space.
//!
//! Page carving runs in parallel with rayon. Results are collected per task
//! and each table's rows are put back in file order at the end, so the
//! report does not depend on thread scheduling. Cancellation is checked
//! before each page task; a cancelled scan returns whatever was merged so
//! far and leaves pending conflicts unattributed.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::sqlite::carver::{CandidateRow, CarveOptions, CarveStats, CorruptedGroup, PageCarve, RowCarver};
use crate::sqlite::constants::*;
use crate::sqlite::database::DatabaseFile;
use crate::sqlite::record::DecodedValue;
use crate::sqlite::schema::{SchemaCatalog, TableSchema};
use crate::SalvageError;

/// Options for a whole-file scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub carve: CarveOptions,
    /// Run the unknown pass after the known pass.
    pub scan_unknown_pages: bool,
    /// First page considered by the unknown pass.
    pub first_unknown_page: u32,
    /// Trailing bytes checked for zeros when a page matches no table.
    pub zero_window: usize,
    /// Pages carved in parallel before resolving conflicts in the unknown pass.
    pub batch_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            carve: CarveOptions::default(),
            scan_unknown_pages: true,
            first_unknown_page: DEFAULT_FIRST_UNKNOWN_PAGE,
            zero_window: DEFAULT_ZERO_WINDOW,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Scan phase reported to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Known,
    Unknown,
}

/// One table claiming an ambiguous page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipCandidate {
    pub root: u32,
    pub name: String,
    /// First row the table's schema found on the page.
    pub sample: CandidateRow,
}

/// Decides which table, if any, owns a page claimed by several tables.
pub trait OwnershipResolver {
    /// Return the root of the owning table, or `None` to attribute nothing.
    ///
    /// `candidates` are in ascending root order.
    fn resolve(&mut self, page: u32, candidates: &[OwnershipCandidate]) -> Option<u32>;
}

impl<F> OwnershipResolver for F
where
    F: FnMut(u32, &[OwnershipCandidate]) -> Option<u32>,
{
    fn resolve(&mut self, page: u32, candidates: &[OwnershipCandidate]) -> Option<u32> {
        self(page, candidates)
    }
}

/// Leaves every ambiguous page unattributed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipAmbiguous;

impl OwnershipResolver for SkipAmbiguous {
    fn resolve(&mut self, _page: u32, _candidates: &[OwnershipCandidate]) -> Option<u32> {
        None
    }
}

/// Attributes every ambiguous page to the candidate with the lowest root.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCandidate;

impl OwnershipResolver for FirstCandidate {
    fn resolve(&mut self, _page: u32, candidates: &[OwnershipCandidate]) -> Option<u32> {
        candidates.first().map(|c| c.root)
    }
}

/// Filter for rows already present in the live database.
pub trait KnownRecords {
    fn contains(&self, root: u32, values: &[DecodedValue]) -> bool;
}

/// Set of known rows, compared by rendered value. Integer and integral
/// real values compare equal.
///
/// The rowid-alias column is left out of the comparison, because carved
/// records store it as NULL while the live table reports the rowid.
#[derive(Debug, Clone, Default)]
pub struct KnownRowSet {
    rows: HashMap<u32, HashSet<Vec<String>>>,
    aliases: HashMap<u32, Option<usize>>,
}

impl KnownRowSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one live row of `schema`.
    pub fn insert(&mut self, schema: &TableSchema, values: &[DecodedValue]) {
        let alias = schema.rowid_alias();
        self.aliases.insert(schema.root_page, alias);
        self.rows
            .entry(schema.root_page)
            .or_default()
            .insert(Self::key(alias, values));
    }

    /// Total number of rows recorded.
    pub fn len(&self) -> usize {
        self.rows.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(alias: Option<usize>, values: &[DecodedValue]) -> Vec<String> {
        values
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != alias)
            .map(|(_, v)| value_key(v))
            .collect()
    }
}

/// Comparison key of one value. Integral REAL values are written to disk
/// with integer serial types, so they key as integers.
fn value_key(value: &DecodedValue) -> String {
    match value {
        DecodedValue::Real(f) if f.fract() == 0.0 && f.abs() < I64_EXACT_LIMIT => {
            format!("INTEGER:{}", *f as i64)
        }
        v => format!("{}:{}", v.storage_class(), v),
    }
}

/// Magnitude below which every integral f64 converts to i64 exactly.
const I64_EXACT_LIMIT: f64 = 9_007_199_254_740_992.0;

impl KnownRecords for KnownRowSet {
    fn contains(&self, root: u32, values: &[DecodedValue]) -> bool {
        let alias = match self.aliases.get(&root) {
            Some(a) => *a,
            None => return false,
        };
        self.rows
            .get(&root)
            .is_some_and(|set| set.contains(&Self::key(alias, values)))
    }
}

/// A page claimed by more than one table, and what was decided for it.
#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousPage {
    pub page: u32,
    pub candidates: Vec<OwnershipCandidate>,
    /// Root the page was attributed to, if any.
    pub chosen: Option<u32>,
}

/// Non-fatal problems found while setting up or running a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanWarning {
    /// A requested root has no schema in the catalog.
    SchemaNotFound { root: u32 },
    /// A table's root page lies outside the file.
    RootPageMissing { root: u32, table: String },
    /// The resolver picked a root that did not claim the page.
    InvalidResolution { page: u32, root: u32 },
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanWarning::SchemaNotFound { root } => write!(f, "no schema for root page {}", root),
            ScanWarning::RootPageMissing { root, table } => {
                write!(f, "root page {} of table {} is outside the file", root, table)
            }
            ScanWarning::InvalidResolution { page, root } => write!(
                f,
                "page {} was resolved to root {}, which did not claim it",
                page, root
            ),
        }
    }
}

/// A page that could not be carved.
#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    pub page: u32,
    pub root: Option<u32>,
    pub error: String,
}

/// Rows recovered for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableRecovery {
    pub root: u32,
    pub name: String,
    pub intact: Vec<CandidateRow>,
    pub corrupted: Vec<CorruptedGroup>,
    /// Pages carved on behalf of this table, ascending.
    pub pages: Vec<u32>,
}

impl TableRecovery {
    fn new(schema: &TableSchema) -> Self {
        TableRecovery {
            root: schema.root_page,
            name: schema.name.clone(),
            intact: Vec::new(),
            corrupted: Vec::new(),
            pages: Vec::new(),
        }
    }
}

/// Recovered rows for every scanned table, keyed by root page.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RecoveryResult {
    tables: BTreeMap<u32, TableRecovery>,
}

impl RecoveryResult {
    /// Tables in ascending root order.
    pub fn tables(&self) -> impl Iterator<Item = &TableRecovery> {
        self.tables.values()
    }

    pub fn get(&self, root: u32) -> Option<&TableRecovery> {
        self.tables.get(&root)
    }

    pub fn total_intact(&self) -> usize {
        self.tables.values().map(|t| t.intact.len()).sum()
    }

    pub fn total_corrupted(&self) -> usize {
        self.tables.values().map(|t| t.corrupted.len()).sum()
    }

    /// Put every table's pages and rows in file order.
    fn sort(&mut self) {
        for table in self.tables.values_mut() {
            table.pages.sort_unstable();
            table.intact.sort_by_key(|r| r.start_offset);
            table.corrupted.sort_by_key(|g| g.header_offset);
        }
    }

    fn register(&mut self, schema: &TableSchema) {
        self.tables
            .entry(schema.root_page)
            .or_insert_with(|| TableRecovery::new(schema));
    }

    /// Merge one page's rows into its table. Returns the number of intact
    /// rows dropped by the known-record filter.
    fn absorb(&mut self, schema: &TableSchema, carve: PageCarve, known: Option<&dyn KnownRecords>) -> u64 {
        let table = self
            .tables
            .entry(schema.root_page)
            .or_insert_with(|| TableRecovery::new(schema));
        table.pages.push(carve.page);

        let mut suppressed = 0;
        for row in carve.intact {
            if known.is_some_and(|k| k.contains(schema.root_page, &row.values)) {
                suppressed += 1;
                continue;
            }
            table.intact.push(row);
        }
        table.corrupted.extend(carve.corrupted);
        suppressed
    }
}

/// Everything a scan produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub results: RecoveryResult,
    pub ambiguous: Vec<AmbiguousPage>,
    pub warnings: Vec<ScanWarning>,
    pub failures: Vec<PageFailure>,
    pub stats: CarveStats,
    /// Page carves merged (one page carved for several tables counts once).
    pub pages_scanned: u64,
    /// Pages skipped because their b-tree kind cannot hold table rows.
    pub pages_skipped: u64,
    pub cancelled: bool,
    /// Page where the unknown pass stopped on an all-zero tail.
    pub stopped_at_page: Option<u32>,
    /// Intact rows dropped because they match a known record.
    pub suppressed_known: u64,
}

/// Outcome of carving one page for one table.
enum PageResult {
    Skipped,
    Carved(PageCarve),
}

/// A page claimed by several tables, waiting for the resolver.
struct PendingPage<'s> {
    page: u32,
    claims: Vec<(&'s TableSchema, PageCarve)>,
}

/// What merging one unknown page led to.
enum PageOutcome<'s> {
    Merged,
    Pending(PendingPage<'s>),
    Stop,
}

type ProgressFn<'a> = Box<dyn Fn(ScanPhase, usize, usize) + 'a>;

/// Runs the known and unknown passes over a database file.
pub struct Scanner<'a> {
    db: &'a DatabaseFile,
    catalog: &'a SchemaCatalog,
    options: &'a ScanOptions,
    cancel: Option<Arc<AtomicBool>>,
    known: Option<&'a dyn KnownRecords>,
    progress: Option<ProgressFn<'a>>,
    roots: Option<Vec<u32>>,
}

impl<'a> Scanner<'a> {
    pub fn new(db: &'a DatabaseFile, catalog: &'a SchemaCatalog, options: &'a ScanOptions) -> Self {
        Scanner {
            db,
            catalog,
            options,
            cancel: None,
            known: None,
            progress: None,
            roots: None,
        }
    }

    /// Stop between page tasks once `flag` becomes true.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Drop intact rows that `known` already contains.
    pub fn with_known(mut self, known: &'a dyn KnownRecords) -> Self {
        self.known = Some(known);
        self
    }

    /// Call `f(phase, done, total)` after each page is merged.
    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(ScanPhase, usize, usize) + 'a,
    {
        self.progress = Some(Box::new(f));
        self
    }

    /// Restrict the scan to these table roots.
    pub fn with_roots(mut self, roots: Vec<u32>) -> Self {
        self.roots = Some(roots);
        self
    }

    fn report_progress(&self, phase: ScanPhase, done: usize, total: usize) {
        if let Some(f) = &self.progress {
            f(phase, done, total);
        }
    }

    fn selected_schemas(&self, report: &mut ScanReport) -> Vec<&'a TableSchema> {
        let catalog: &'a SchemaCatalog = self.catalog;
        match &self.roots {
            None => catalog.tables().collect(),
            Some(roots) => {
                let unique: BTreeSet<u32> = roots.iter().copied().collect();
                let mut schemas = Vec::new();
                for root in unique {
                    match catalog.lookup(root) {
                        Ok(schema) => schemas.push(schema),
                        Err(_) => {
                            tracing::warn!(root, "no schema for requested root");
                            report.warnings.push(ScanWarning::SchemaNotFound { root });
                        }
                    }
                }
                schemas
            }
        }
    }

    /// Run the scan.
    ///
    /// `resolver` is consulted for every page several tables claimed in the
    /// unknown pass, after the pass has merged everything else.
    pub fn scan(&self, resolver: &mut dyn OwnershipResolver) -> ScanReport {
        let mut report = ScanReport::default();
        let schemas = self.selected_schemas(&mut report);
        for schema in &schemas {
            report.results.register(schema);
        }

        let done = self.known_pass(&schemas, &mut report);
        if report.cancelled {
            tracing::info!("scan cancelled during known pass");
            report.results.sort();
            return report;
        }

        if self.options.scan_unknown_pages && !schemas.is_empty() {
            let pending = self.unknown_pass(&schemas, &done, &mut report);
            self.settle_pending(pending, resolver, &mut report);
        }
        report.results.sort();

        tracing::info!(
            intact = report.results.total_intact(),
            corrupted = report.results.total_corrupted(),
            ambiguous = report.ambiguous.len(),
            cancelled = report.cancelled,
            "scan finished"
        );
        report
    }

    fn known_pass(&self, schemas: &[&'a TableSchema], report: &mut ScanReport) -> BTreeSet<u32> {
        let page_count = self.db.page_count();
        let mut tasks: Vec<(&TableSchema, u32)> = Vec::new();

        for schema in schemas {
            let root = schema.root_page;
            let mut pages = match self.db.pages_for_root(root) {
                Ok(p) => p,
                Err(_) => {
                    tracing::warn!(root, table = %schema.name, "root page outside the file");
                    report.warnings.push(ScanWarning::RootPageMissing {
                        root,
                        table: schema.name.clone(),
                    });
                    continue;
                }
            };
            pages.insert(root);
            pages.retain(|&p| p <= page_count);
            tasks.extend(pages.into_iter().map(|p| (*schema, p)));
        }

        tracing::info!(tasks = tasks.len(), "known pass");

        let db = self.db;
        let carve = &self.options.carve;
        let cancel = self.cancel.as_ref();
        let results: Vec<Option<Result<PageResult, SalvageError>>> = tasks
            .par_iter()
            .map(|&(schema, page)| {
                if is_cancelled(cancel) {
                    return None;
                }
                Some(carve_page(db, schema, carve, page))
            })
            .collect();

        let total = tasks.len();
        let mut done = BTreeSet::new();
        for (i, ((schema, page), result)) in tasks.iter().zip(results).enumerate() {
            match result {
                None => {
                    report.cancelled = true;
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(page, root = schema.root_page, error = %e, "page carve failed");
                    report.failures.push(PageFailure {
                        page: *page,
                        root: Some(schema.root_page),
                        error: e.to_string(),
                    });
                }
                Some(Ok(PageResult::Skipped)) => {
                    report.pages_skipped += 1;
                }
                Some(Ok(PageResult::Carved(carve))) => {
                    tracing::debug!(
                        page,
                        table = %schema.name,
                        intact = carve.intact.len(),
                        corrupted = carve.corrupted.len(),
                        "carved known page"
                    );
                    report.stats += carve.stats;
                    report.pages_scanned += 1;
                    report.suppressed_known += report.results.absorb(schema, carve, self.known);
                }
            }
            done.insert(*page);
            self.report_progress(ScanPhase::Known, i + 1, total);
        }
        done
    }

    /// Carve the remaining pages and merge those with a single owner.
    /// Returns the pages several tables claimed, in page order.
    fn unknown_pass(
        &self,
        schemas: &[&'a TableSchema],
        done: &BTreeSet<u32>,
        report: &mut ScanReport,
    ) -> Vec<PendingPage<'a>> {
        let first = self.options.first_unknown_page.max(1);
        let pages: Vec<u32> = (first..=self.db.page_count())
            .filter(|p| !done.contains(p))
            .collect();
        tracing::info!(pages = pages.len(), first, "unknown pass");

        let db = self.db;
        let carve = &self.options.carve;
        let cancel = self.cancel.as_ref();
        let total = pages.len();
        let mut merged = 0;
        let mut pending = Vec::new();

        'batches: for batch in pages.chunks(self.options.batch_size.max(1)) {
            let results: Vec<Option<Vec<Result<PageResult, SalvageError>>>> = batch
                .par_iter()
                .map(|&page| {
                    if is_cancelled(cancel) {
                        return None;
                    }
                    Some(
                        schemas
                            .par_iter()
                            .map(|schema| carve_page(db, schema, carve, page))
                            .collect(),
                    )
                })
                .collect();

            for (&page, result) in batch.iter().zip(results) {
                let per_schema = match result {
                    Some(r) => r,
                    None => {
                        report.cancelled = true;
                        break 'batches;
                    }
                };
                merged += 1;
                match self.merge_page(page, schemas, per_schema, report) {
                    PageOutcome::Stop => break 'batches,
                    PageOutcome::Pending(p) => pending.push(p),
                    PageOutcome::Merged => {}
                }
                self.report_progress(ScanPhase::Unknown, merged, total);
            }
        }
        pending
    }

    /// Merge the carves of one unknown page.
    fn merge_page(
        &self,
        page: u32,
        schemas: &[&'a TableSchema],
        per_schema: Vec<Result<PageResult, SalvageError>>,
        report: &mut ScanReport,
    ) -> PageOutcome<'a> {
        let mut matches: Vec<(&'a TableSchema, PageCarve)> = Vec::new();
        let mut skipped = false;
        for (schema, result) in schemas.iter().zip(per_schema) {
            match result {
                Ok(PageResult::Skipped) => skipped = true,
                Ok(PageResult::Carved(carve)) => {
                    report.stats += carve.stats;
                    if !carve.is_empty() {
                        matches.push((*schema, carve));
                    }
                }
                Err(e) => {
                    report.failures.push(PageFailure {
                        page,
                        root: Some(schema.root_page),
                        error: e.to_string(),
                    });
                }
            }
        }
        if skipped {
            report.pages_skipped += 1;
            return PageOutcome::Merged;
        }
        report.pages_scanned += 1;

        match matches.len() {
            0 => {
                let zero_tail = self
                    .db
                    .trailing_zeros(page, self.options.zero_window)
                    .unwrap_or(false);
                if zero_tail {
                    tracing::info!(page, "no rows and zero-filled tail, stopping unknown pass");
                    report.stopped_at_page = Some(page);
                    return PageOutcome::Stop;
                }
                PageOutcome::Merged
            }
            1 => {
                let (schema, carve) = matches.remove(0);
                tracing::debug!(page, table = %schema.name, "attributed unknown page");
                report.suppressed_known += report.results.absorb(schema, carve, self.known);
                PageOutcome::Merged
            }
            _ => {
                tracing::debug!(page, claims = matches.len(), "ambiguous page set aside");
                PageOutcome::Pending(PendingPage {
                    page,
                    claims: matches,
                })
            }
        }
    }

    /// Ask `resolver` about every page several tables claimed. After a
    /// cancellation the pages are recorded without asking.
    fn settle_pending(
        &self,
        pending: Vec<PendingPage<'a>>,
        resolver: &mut dyn OwnershipResolver,
        report: &mut ScanReport,
    ) {
        for PendingPage { page, claims: mut matches } in pending {
            let candidates: Vec<OwnershipCandidate> = matches
                .iter()
                .filter_map(|(schema, carve)| {
                    carve.sample().map(|row| OwnershipCandidate {
                        root: schema.root_page,
                        name: schema.name.clone(),
                        sample: row.clone(),
                    })
                })
                .collect();
            let choice = if report.cancelled {
                None
            } else {
                resolver.resolve(page, &candidates)
            };
            let chosen = match choice {
                Some(root) => match matches.iter().position(|(s, _)| s.root_page == root) {
                    Some(idx) => {
                        let (schema, carve) = matches.swap_remove(idx);
                        report.suppressed_known += report.results.absorb(schema, carve, self.known);
                        Some(root)
                    }
                    None => {
                        tracing::warn!(page, root, "resolver chose a table that did not claim the page");
                        report.warnings.push(ScanWarning::InvalidResolution { page, root });
                        None
                    }
                },
                None => None,
            };
            tracing::debug!(page, claims = candidates.len(), ?chosen, "ambiguous page");
            report.ambiguous.push(AmbiguousPage {
                page,
                candidates,
                chosen,
            });
        }
    }
}

fn is_cancelled(flag: Option<&Arc<AtomicBool>>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::Relaxed))
}

fn carve_page(
    db: &DatabaseFile,
    schema: &TableSchema,
    options: &CarveOptions,
    page: u32,
) -> Result<PageResult, SalvageError> {
    if !db.page_kind(page)?.may_hold_rows() {
        return Ok(PageResult::Skipped);
    }
    let range = db.carve_range(page)?;
    let carver = RowCarver::new(schema, options, db.text_encoding());
    Ok(PageResult::Carved(carver.carve(db.data(), range)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::schema::ColumnDef;
    use byteorder::{BigEndian, ByteOrder};
    use std::cell::RefCell;

    const PS: usize = 512;

    fn image(pages: usize) -> Vec<u8> {
        let mut data = vec![0u8; PS * pages];
        data[..16].copy_from_slice(DB_HEADER_MAGIC);
        BigEndian::write_u16(&mut data[DB_PAGE_SIZE..], PS as u16);
        BigEndian::write_u32(&mut data[DB_TEXT_ENCODING..], ENCODING_UTF8);
        data[DB_HEADER_SIZE] = PAGE_FLAG_LEAF_TABLE;
        for p in 1..pages {
            data[p * PS] = PAGE_FLAG_LEAF_TABLE;
        }
        data
    }

    /// Write a (NULL rowid alias, text) record at `offset` within `page`.
    fn put_row(data: &mut [u8], page: usize, offset: usize, text: &str) {
        let start = (page - 1) * PS + offset;
        data[start] = 0x00;
        data[start + 1] = (13 + 2 * text.len()) as u8;
        data[start + 2..start + 2 + text.len()].copy_from_slice(text.as_bytes());
    }

    fn table(root: u32, name: &str, second: &str) -> TableSchema {
        TableSchema {
            root_page: root,
            name: name.into(),
            columns: vec![
                ColumnDef {
                    position: 0,
                    name: "id".into(),
                    declared_type: "INTEGER".into(),
                    not_null: false,
                    is_primary_key: true,
                },
                ColumnDef {
                    position: 1,
                    name: second.into(),
                    declared_type: "TEXT".into(),
                    not_null: false,
                    is_primary_key: false,
                },
            ],
        }
    }

    fn catalog() -> SchemaCatalog {
        let mut catalog = SchemaCatalog::new();
        catalog
            .load(vec![table(2, "people", "name"), table(3, "books", "title")])
            .unwrap();
        catalog
    }

    #[test]
    fn test_known_pass_finds_rows_on_root_page() {
        let mut data = image(3);
        put_row(&mut data, 2, 200, "alice");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let catalog = catalog();
        let options = ScanOptions {
            scan_unknown_pages: false,
            ..ScanOptions::default()
        };

        let report = Scanner::new(&db, &catalog, &options).scan(&mut SkipAmbiguous);
        let people = report.results.get(2).unwrap();
        assert_eq!(people.intact.len(), 1);
        assert_eq!(people.intact[0].values[1], DecodedValue::Text("alice".into()));
        assert_eq!(people.intact[0].start_offset, PS + 200);
        assert_eq!(people.pages, vec![2]);
        assert!(report.results.get(3).unwrap().intact.is_empty());
        assert!(!report.cancelled);
    }

    #[test]
    fn test_ambiguous_page_goes_to_resolver() {
        let mut data = image(6);
        data[3 * PS] = 0;
        put_row(&mut data, 4, 50, "shared");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let catalog = catalog();
        let options = ScanOptions::default();

        let calls = RefCell::new(Vec::new());
        let mut resolver = |page: u32, candidates: &[OwnershipCandidate]| -> Option<u32> {
            calls
                .borrow_mut()
                .push((page, candidates.iter().map(|c| c.root).collect::<Vec<_>>()));
            Some(3)
        };
        let report = Scanner::new(&db, &catalog, &options).scan(&mut resolver);

        assert_eq!(*calls.borrow(), vec![(4, vec![2, 3])]);
        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].chosen, Some(3));
        assert_eq!(
            report.ambiguous[0].candidates[0].sample.values[1],
            DecodedValue::Text("shared".into())
        );
        assert_eq!(report.results.get(3).unwrap().intact.len(), 1);
        assert!(report.results.get(2).unwrap().intact.is_empty());
    }

    #[test]
    fn test_resolver_none_attributes_nothing() {
        let mut data = image(4);
        data[3 * PS] = 0;
        put_row(&mut data, 4, 50, "shared");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let catalog = catalog();
        let options = ScanOptions::default();

        let report = Scanner::new(&db, &catalog, &options).scan(&mut SkipAmbiguous);
        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].chosen, None);
        assert_eq!(report.results.total_intact(), 0);

        let report = Scanner::new(&db, &catalog, &options).scan(&mut FirstCandidate);
        assert_eq!(report.ambiguous[0].chosen, Some(2));
        assert_eq!(report.results.get(2).unwrap().intact.len(), 1);
    }

    #[test]
    fn test_single_match_is_attributed() {
        let mut catalog = SchemaCatalog::new();
        catalog.load(vec![table(2, "people", "name")]).unwrap();
        let mut data = image(4);
        // keep page 3 from looking like the end of used space
        data[3 * PS - 1] = 0xEE;
        put_row(&mut data, 4, 80, "bob");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let options = ScanOptions::default();

        let report = Scanner::new(&db, &catalog, &options).scan(&mut SkipAmbiguous);
        let people = report.results.get(2).unwrap();
        assert_eq!(people.intact.len(), 1);
        assert_eq!(people.pages, vec![2, 4]);
        assert!(report.ambiguous.is_empty());
    }

    #[test]
    fn test_zero_tail_stops_unknown_pass() {
        let mut data = image(6);
        put_row(&mut data, 6, 40, "late");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let catalog = catalog();
        let options = ScanOptions::default();

        let report = Scanner::new(&db, &catalog, &options).scan(&mut FirstCandidate);
        // Page 4 is the first unclaimed page and is all zeros after its flag
        assert_eq!(report.stopped_at_page, Some(4));
        assert_eq!(report.results.total_intact(), 0);
    }

    #[test]
    fn test_cancelled_scan_returns_partial_report() {
        let mut data = image(4);
        put_row(&mut data, 2, 100, "alice");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let catalog = catalog();
        let options = ScanOptions::default();
        let flag = Arc::new(AtomicBool::new(true));

        let report = Scanner::new(&db, &catalog, &options)
            .with_cancel(flag)
            .scan(&mut SkipAmbiguous);
        assert!(report.cancelled);
        assert_eq!(report.results.total_intact(), 0);
        assert_eq!(report.pages_scanned, 0);
    }

    #[test]
    fn test_known_rows_are_suppressed() {
        let mut data = image(3);
        put_row(&mut data, 2, 100, "alice");
        put_row(&mut data, 2, 300, "carol");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let catalog = catalog();
        let options = ScanOptions {
            scan_unknown_pages: false,
            ..ScanOptions::default()
        };
        let mut known = KnownRowSet::new();
        known.insert(
            catalog.lookup(2).unwrap(),
            &[DecodedValue::Integer(7), DecodedValue::Text("alice".into())],
        );

        let report = Scanner::new(&db, &catalog, &options)
            .with_known(&known)
            .scan(&mut SkipAmbiguous);
        let people = report.results.get(2).unwrap();
        assert_eq!(people.intact.len(), 1);
        assert_eq!(people.intact[0].values[1], DecodedValue::Text("carol".into()));
        assert_eq!(report.suppressed_known, 1);
    }

    #[test]
    fn test_unknown_root_is_a_warning() {
        let db = DatabaseFile::from_bytes(image(3)).unwrap();
        let catalog = catalog();
        let options = ScanOptions::default();
        let report = Scanner::new(&db, &catalog, &options)
            .with_roots(vec![2, 99])
            .scan(&mut SkipAmbiguous);
        assert_eq!(report.warnings, vec![ScanWarning::SchemaNotFound { root: 99 }]);
        assert!(report.results.get(2).is_some());
        assert!(report.results.get(3).is_none());
    }

    #[test]
    fn test_root_outside_file_is_a_warning() {
        let mut catalog = SchemaCatalog::new();
        catalog.load(vec![table(40, "gone", "x")]).unwrap();
        let db = DatabaseFile::from_bytes(image(2)).unwrap();
        let options = ScanOptions::default();
        let report = Scanner::new(&db, &catalog, &options).scan(&mut SkipAmbiguous);
        assert!(matches!(
            report.warnings.as_slice(),
            [ScanWarning::RootPageMissing { root: 40, .. }]
        ));
    }

    #[test]
    fn test_report_independent_of_batch_size() {
        let mut data = image(8);
        for p in 4..=8usize {
            data[p * PS - 1] = 0xEE;
        }
        for p in [4usize, 6, 8] {
            data[(p - 1) * PS] = 0;
        }
        put_row(&mut data, 4, 30, "one");
        put_row(&mut data, 6, 60, "two");
        put_row(&mut data, 8, 90, "three");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let catalog = catalog();

        let summary = |batch_size: usize| {
            let options = ScanOptions {
                batch_size,
                ..ScanOptions::default()
            };
            let report = Scanner::new(&db, &catalog, &options).scan(&mut FirstCandidate);
            report
                .results
                .tables()
                .map(|t| (t.root, t.intact.iter().map(|r| r.start_offset).collect::<Vec<_>>()))
                .collect::<Vec<_>>()
        };
        assert_eq!(summary(1), summary(64));
        assert_eq!(summary(1)[0].1.len(), 3);
    }

    #[test]
    fn test_progress_callback() {
        let db = DatabaseFile::from_bytes(image(3)).unwrap();
        let catalog = catalog();
        let options = ScanOptions {
            scan_unknown_pages: false,
            ..ScanOptions::default()
        };
        let seen = RefCell::new(Vec::new());
        Scanner::new(&db, &catalog, &options)
            .with_progress(|phase, done, total| seen.borrow_mut().push((phase, done, total)))
            .scan(&mut SkipAmbiguous);
        assert_eq!(
            *seen.borrow(),
            vec![(ScanPhase::Known, 1, 2), (ScanPhase::Known, 2, 2)]
        );
    }

    #[test]
    fn test_ambiguous_page_does_not_hold_up_later_pages() {
        let counts = TableSchema {
            root_page: 4,
            name: "counts".into(),
            columns: vec![
                ColumnDef {
                    position: 0,
                    name: "id".into(),
                    declared_type: "INTEGER".into(),
                    not_null: false,
                    is_primary_key: true,
                },
                ColumnDef {
                    position: 1,
                    name: "n".into(),
                    declared_type: "INTEGER".into(),
                    not_null: false,
                    is_primary_key: false,
                },
            ],
        };
        let mut catalog = SchemaCatalog::new();
        catalog
            .load(vec![table(2, "people", "name"), table(3, "books", "title"), counts])
            .unwrap();

        let mut data = image(6);
        data[4 * PS] = 0;
        data[5 * PS] = 0;
        // page 5: a text row both text tables accept
        put_row(&mut data, 5, 50, "shared");
        // page 6: an integer row only `counts` accepts
        let start = 5 * PS + 80;
        data[start..start + 3].copy_from_slice(&[0x00, 0x01, 0x07]);
        let db = DatabaseFile::from_bytes(data).unwrap();
        let options = ScanOptions {
            batch_size: 1,
            ..ScanOptions::default()
        };

        let events = RefCell::new(Vec::new());
        let mut resolver = |page: u32, _candidates: &[OwnershipCandidate]| -> Option<u32> {
            events.borrow_mut().push(format!("resolve {}", page));
            Some(3)
        };
        let report = Scanner::new(&db, &catalog, &options)
            .with_progress(|phase, done, _total| {
                if phase == ScanPhase::Unknown {
                    events.borrow_mut().push(format!("merged {}", done));
                }
            })
            .scan(&mut resolver);

        assert_eq!(
            *events.borrow(),
            vec!["merged 1".to_string(), "merged 2".to_string(), "resolve 5".to_string()]
        );
        let counted = report.results.get(4).unwrap();
        assert_eq!(counted.pages, vec![4, 6]);
        assert_eq!(counted.intact[0].values[1], DecodedValue::Integer(7));
        assert_eq!(report.results.get(3).unwrap().pages, vec![3, 5]);
        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].chosen, Some(3));
    }

    #[test]
    fn test_pending_pages_unattributed_after_cancel() {
        let mut data = image(5);
        data[3 * PS] = 0;
        put_row(&mut data, 4, 50, "shared");
        let db = DatabaseFile::from_bytes(data).unwrap();
        let catalog = catalog();
        let options = ScanOptions {
            batch_size: 1,
            ..ScanOptions::default()
        };
        let flag = Arc::new(AtomicBool::new(false));

        let calls = RefCell::new(0);
        let mut resolver = |_page: u32, _candidates: &[OwnershipCandidate]| -> Option<u32> {
            *calls.borrow_mut() += 1;
            Some(2)
        };
        let stop = flag.clone();
        let report = Scanner::new(&db, &catalog, &options)
            .with_cancel(flag)
            .with_progress(move |phase, _done, _total| {
                if phase == ScanPhase::Unknown {
                    stop.store(true, Ordering::SeqCst);
                }
            })
            .scan(&mut resolver);

        assert!(report.cancelled);
        assert_eq!(*calls.borrow(), 0);
        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].chosen, None);
        assert_eq!(report.results.total_intact(), 0);
    }

    #[test]
    fn test_integral_real_matches_stored_integer() {
        let schema = TableSchema {
            root_page: 2,
            name: "prices".into(),
            columns: vec![
                ColumnDef {
                    position: 0,
                    name: "id".into(),
                    declared_type: "INTEGER".into(),
                    not_null: false,
                    is_primary_key: true,
                },
                ColumnDef {
                    position: 1,
                    name: "price".into(),
                    declared_type: "REAL".into(),
                    not_null: false,
                    is_primary_key: false,
                },
            ],
        };
        let mut known = KnownRowSet::new();
        known.insert(&schema, &[DecodedValue::Integer(1), DecodedValue::Real(3.0)]);
        known.insert(&schema, &[DecodedValue::Integer(2), DecodedValue::Real(2.5)]);

        assert!(known.contains(2, &[DecodedValue::Null, DecodedValue::Integer(3)]));
        assert!(known.contains(2, &[DecodedValue::Null, DecodedValue::Real(3.0)]));
        assert!(known.contains(2, &[DecodedValue::Null, DecodedValue::Real(2.5)]));
        assert!(!known.contains(2, &[DecodedValue::Null, DecodedValue::Integer(2)]));
        assert!(!known.contains(2, &[DecodedValue::Null, DecodedValue::Text("3".into())]));
    }
}
