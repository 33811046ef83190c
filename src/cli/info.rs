use std::collections::BTreeMap;
use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::cli::{open_database, wprintln};
use crate::sqlite::database::{DatabaseFile, DatabaseHeader};
use crate::sqlite::page::PageKind;
use crate::SalvageError;

/// Options for the `salvage info` subcommand.
pub struct InfoOptions {
    /// Path to the SQLite database file.
    pub file: String,
    /// List the kind of every page.
    pub verbose: bool,
    /// Emit output as JSON.
    pub json: bool,
    /// Override the page size from the header.
    pub page_size: Option<u32>,
}

#[derive(Serialize)]
struct PageKindJson {
    page: u32,
    kind: PageKind,
}

#[derive(Serialize)]
struct InfoJson<'a> {
    file: &'a str,
    file_size: usize,
    page_size: u32,
    page_count: u32,
    text_encoding: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<&'a DatabaseHeader>,
    page_kinds: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pages: Vec<PageKindJson>,
}

fn classify_pages(db: &DatabaseFile) -> Vec<(u32, PageKind)> {
    (1..=db.page_count())
        .map(|p| (p, db.page_kind(p).unwrap_or(PageKind::Unknown)))
        .collect()
}

fn histogram(kinds: &[(u32, PageKind)]) -> BTreeMap<PageKind, u64> {
    let mut counts = BTreeMap::new();
    for (_, kind) in kinds {
        *counts.entry(*kind).or_insert(0) += 1;
    }
    counts
}

/// Show header fields, page count, and a histogram of b-tree page kinds.
///
/// A damaged header is still reported; fields that cannot be trusted (an
/// invalid magic string or page size) are flagged rather than rejected.
pub fn execute(opts: &InfoOptions, writer: &mut dyn Write) -> Result<(), SalvageError> {
    let db = open_database(&opts.file, opts.page_size, false)?;
    let kinds = classify_pages(&db);
    let counts = histogram(&kinds);

    if opts.json {
        let info = InfoJson {
            file: &opts.file,
            file_size: db.file_size(),
            page_size: db.page_size(),
            page_count: db.page_count(),
            text_encoding: db.text_encoding().name(),
            header: db.header(),
            page_kinds: counts
                .iter()
                .map(|(k, v)| (k.name().to_string(), *v))
                .collect(),
            pages: if opts.verbose {
                kinds
                    .iter()
                    .map(|&(page, kind)| PageKindJson { page, kind })
                    .collect()
            } else {
                Vec::new()
            },
        };
        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| SalvageError::Parse(format!("JSON serialization error: {}", e)))?;
        wprintln!(writer, "{}", json)?;
        return Ok(());
    }

    wprintln!(writer, "{}", "Database Header".bold())?;
    wprintln!(writer, "  File:           {}", opts.file)?;
    wprintln!(
        writer,
        "  File size:      {} bytes ({} pages x {} bytes)",
        db.file_size(),
        db.page_count(),
        db.page_size()
    )?;
    match db.header() {
        Some(h) => {
            if h.magic_valid {
                wprintln!(writer, "  Magic:          {}", "SQLite format 3".green())?;
            } else {
                wprintln!(writer, "  Magic:          {}", "INVALID".red())?;
            }
            let raw = match h.page_size() {
                Some(ps) => ps.to_string(),
                None => format!("{} {}", h.raw_page_size, "(invalid)".red()),
            };
            wprintln!(writer, "  Page size:      {}", raw)?;
            wprintln!(
                writer,
                "  File format:    write {} / read {}",
                h.write_version,
                h.read_version
            )?;
            wprintln!(writer, "  Reserved:       {} bytes per page", h.reserved_space)?;
            wprintln!(writer, "  Change counter: {}", h.change_counter)?;
            wprintln!(writer, "  Header pages:   {}", h.page_count)?;
            wprintln!(
                writer,
                "  Freelist:       {} pages (first trunk {})",
                h.freelist_count,
                h.freelist_trunk
            )?;
            wprintln!(writer, "  Schema cookie:  {}", h.schema_cookie)?;
            wprintln!(writer, "  Text encoding:  {}", db.text_encoding().name())?;
            wprintln!(writer, "  User version:   {}", h.user_version)?;
            wprintln!(writer, "  SQLite version: {}", h.sqlite_version_string())?;
        }
        None => wprintln!(writer, "  Header:         {}", "truncated".red())?,
    }
    wprintln!(writer)?;

    wprintln!(writer, "{}", "Page Kinds".bold())?;
    for (kind, count) in &counts {
        wprintln!(
            writer,
            "  {:<16} {:>8}  {}",
            kind.name(),
            count,
            kind.description()
        )?;
    }

    if opts.verbose {
        wprintln!(writer)?;
        wprintln!(writer, "{}", "Pages".bold())?;
        for (page, kind) in &kinds {
            let label = if kind.may_hold_rows() {
                kind.name().cyan()
            } else {
                kind.name().dimmed()
            };
            wprintln!(writer, "  {:>6}  {}", page, label)?;
        }
    }

    Ok(())
}
