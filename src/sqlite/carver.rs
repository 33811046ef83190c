//! Brute-force row carving.
//!
//! [`RowCarver`] walks a byte range one offset at a time and asks, at every
//! position, "could a record of this table start here?". A record as carved
//! is the run of serial type codes (one per column) followed immediately by
//! the payload those codes describe. Cell headers (payload length and rowid)
//! are not required, because deleted cells usually have them overwritten by
//! freeblock links.
//!
//! Two passes are available:
//!
//! - **Intact scan** ([`RowCarver::intact_rows`]): read one serial per column,
//!   validate them against the schema, decode the payload, and keep the row if
//!   every value passes the content filters. After a hit the scan resumes at
//!   the end of the row.
//! - **Corrupted-header scan** ([`RowCarver::corrupted_rows`]): for tables
//!   whose primary-key columns lead the column list, assume the key serials are
//!   lost, read and validate only the remaining serials, then retry payload
//!   decoding at every plausible key width. All surviving attempts for one
//!   header position form a [`CorruptedGroup`]; choosing among them is left to
//!   the caller.
//!
//! Failures at a single offset are normal and are only counted in
//! [`CarveStats`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;

use crate::sqlite::constants::*;
use crate::sqlite::page::PageSpan;
use crate::sqlite::record::{DecodedValue, RecordDecoder, TextEncoding, TextFilter};
use crate::sqlite::schema::TableSchema;
use crate::sqlite::serial::{validate, ValidationPolicy};
use crate::sqlite::varint::{read_header_length_varint, read_varint};
use crate::SalvageError;

/// Options controlling how rows are carved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarveOptions {
    /// Use the strict serial/affinity table instead of the lenient one.
    pub strict_validation: bool,
    /// Run the corrupted-header pass after the intact pass.
    pub attempt_corrupted_rows: bool,
    /// Largest serial type code accepted in an intact header.
    pub sanity_ceiling: u64,
    /// Content filters applied to decoded values.
    pub text_filters: BTreeSet<TextFilter>,
    /// Control bytes let through by the control-byte filter.
    pub control_allow: Vec<u8>,
    /// Maximum key width tried per primary-key column in the corrupted pass.
    pub pk_shift_per_column: usize,
}

impl Default for CarveOptions {
    fn default() -> Self {
        CarveOptions {
            strict_validation: false,
            attempt_corrupted_rows: false,
            sanity_ceiling: DEFAULT_SANITY_CEILING,
            text_filters: TextFilter::defaults(),
            control_allow: vec![b'\t'],
            pk_shift_per_column: DEFAULT_PK_SHIFT_PER_COLUMN,
        }
    }
}

impl CarveOptions {
    pub fn policy(&self) -> ValidationPolicy {
        if self.strict_validation {
            ValidationPolicy::Strict
        } else {
            ValidationPolicy::Lenient
        }
    }
}

/// A row reconstructed at some byte offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRow {
    pub table_root: u32,
    pub page: u32,
    /// File offset of the first serial type byte.
    pub start_offset: usize,
    /// File offset one past the last payload byte.
    pub end_offset: usize,
    /// One value per column for intact rows; primary-key columns are
    /// omitted from corrupted-header rows.
    pub values: Vec<DecodedValue>,
}

/// Alternative decodings of one corrupted record header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorruptedGroup {
    pub table_root: u32,
    pub page: u32,
    /// File offset of the first readable (non-key) serial type byte.
    pub header_offset: usize,
    /// One row per surviving key width, in increasing width order.
    pub alternatives: Vec<CandidateRow>,
}

/// Per-offset outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CarveStats {
    pub offsets_tried: u64,
    pub truncated: u64,
    pub invalid_header: u64,
    pub ceiling_rejects: u64,
    pub payload_rejects: u64,
    pub unsupported_serials: u64,
}

impl CarveStats {
    fn record_error(&mut self, err: &SalvageError) {
        match err {
            SalvageError::TruncatedInput { .. } => self.truncated += 1,
            SalvageError::InvalidHeader(_) => self.invalid_header += 1,
            SalvageError::UnsupportedSerialType(_) => self.unsupported_serials += 1,
            _ => self.payload_rejects += 1,
        }
    }
}

impl AddAssign for CarveStats {
    fn add_assign(&mut self, other: Self) {
        self.offsets_tried += other.offsets_tried;
        self.truncated += other.truncated;
        self.invalid_header += other.invalid_header;
        self.ceiling_rejects += other.ceiling_rejects;
        self.payload_rejects += other.payload_rejects;
        self.unsupported_serials += other.unsupported_serials;
    }
}

/// Result of an intact scan over one range.
#[derive(Debug, Clone, Default)]
pub struct IntactScan {
    pub rows: Vec<CandidateRow>,
    pub stats: CarveStats,
}

impl IntactScan {
    /// Start offset to end offset of every accepted row.
    pub fn row_bounds(&self) -> BTreeMap<usize, usize> {
        self.rows
            .iter()
            .map(|r| (r.start_offset, r.end_offset))
            .collect()
    }
}

/// Result of a corrupted-header scan over one range.
#[derive(Debug, Clone, Default)]
pub struct CorruptedScan {
    pub groups: Vec<CorruptedGroup>,
    pub stats: CarveStats,
}

/// Everything carved from one page for one table.
#[derive(Debug, Clone, Default)]
pub struct PageCarve {
    pub page: u32,
    pub intact: Vec<CandidateRow>,
    pub corrupted: Vec<CorruptedGroup>,
    pub stats: CarveStats,
}

impl PageCarve {
    /// True if neither pass produced anything.
    pub fn is_empty(&self) -> bool {
        self.intact.is_empty() && self.corrupted.is_empty()
    }

    /// First row found, preferring intact rows; used as a sample when several
    /// tables claim the same page.
    pub fn sample(&self) -> Option<&CandidateRow> {
        self.intact
            .first()
            .or_else(|| self.corrupted.first().and_then(|g| g.alternatives.first()))
    }
}

/// Carves rows of one table from byte ranges.
pub struct RowCarver<'a> {
    schema: &'a TableSchema,
    decoder: RecordDecoder,
    policy: ValidationPolicy,
    ceiling: u64,
    attempt_corrupted: bool,
    max_shift: usize,
    rowid_alias: Option<usize>,
}

impl<'a> RowCarver<'a> {
    pub fn new(schema: &'a TableSchema, options: &CarveOptions, encoding: TextEncoding) -> Self {
        RowCarver {
            schema,
            decoder: RecordDecoder::new(encoding, &options.text_filters, &options.control_allow),
            policy: options.policy(),
            ceiling: options.sanity_ceiling,
            attempt_corrupted: options.attempt_corrupted_rows,
            max_shift: options.pk_shift_per_column * schema.pk_count(),
            rowid_alias: schema.rowid_alias(),
        }
    }

    /// Run the intact scan, then (if enabled) the corrupted-header scan.
    pub fn carve(&self, data: &[u8], span: PageSpan) -> PageCarve {
        let intact = self.intact_rows(data, span);
        let mut stats = intact.stats;
        let corrupted = if self.attempt_corrupted {
            let scan = self.corrupted_rows(data, span, &intact.row_bounds());
            stats += scan.stats;
            scan.groups
        } else {
            Vec::new()
        };
        PageCarve {
            page: span.page_number,
            intact: intact.rows,
            corrupted,
            stats,
        }
    }

    /// Scan `span` for records whose full header survives.
    pub fn intact_rows(&self, data: &[u8], span: PageSpan) -> IntactScan {
        let mut scan = IntactScan::default();
        let end = span.end_offset.min(data.len());
        let window = &data[..end];
        let columns = self.schema.column_count();

        let mut offset = span.start_offset;
        while offset < end {
            scan.stats.offsets_tried += 1;

            let (serials, body) = match read_serials(window, offset, columns, read_header_length_varint) {
                Ok(v) => v,
                Err(e @ SalvageError::TruncatedInput { .. }) => {
                    scan.stats.record_error(&e);
                    break;
                }
                Err(e) => {
                    scan.stats.record_error(&e);
                    offset += 1;
                    continue;
                }
            };
            if body >= end {
                break;
            }

            if serials.iter().any(|&s| s > self.ceiling) {
                scan.stats.ceiling_rejects += 1;
                offset += 1;
                continue;
            }
            if !self.intact_header_valid(&serials) {
                scan.stats.invalid_header += 1;
                offset += 1;
                continue;
            }

            match self.decode_payload(window, body, &serials) {
                Ok((values, row_end)) => {
                    scan.rows.push(CandidateRow {
                        table_root: self.schema.root_page,
                        page: span.page_number,
                        start_offset: offset,
                        end_offset: row_end,
                        values,
                    });
                    offset = row_end.max(offset + 1);
                }
                Err(e) => {
                    scan.stats.record_error(&e);
                    offset += 1;
                }
            }
        }

        scan
    }

    fn intact_header_valid(&self, serials: &[u64]) -> bool {
        let columns = &self.schema.columns;
        match self.rowid_alias {
            // The rowid alias is stored as NULL; the rowid itself lives in
            // the cell header.
            Some(k) => {
                serials[k] == 0
                    && validate(&serials[..k], columns, 0, self.policy).is_accepted()
                    && validate(&serials[k + 1..], columns, k + 1, self.policy).is_accepted()
            }
            None => validate(serials, columns, 0, self.policy).is_accepted(),
        }
    }

    /// Decode the payload described by `serials` starting at `pos`.
    ///
    /// Returns the values and the offset one past the payload. Rows with no
    /// content at all are rejected.
    fn decode_payload(
        &self,
        window: &[u8],
        mut pos: usize,
        serials: &[u64],
    ) -> Result<(Vec<DecodedValue>, usize), SalvageError> {
        let mut values = Vec::with_capacity(serials.len());
        for &serial in serials {
            let (value, used) = self.decoder.decode(serial, window, pos)?;
            values.push(value);
            pos += used;
        }
        if !values.iter().any(DecodedValue::has_content) {
            return Err(SalvageError::InvalidHeader("record carries no content"));
        }
        Ok((values, pos))
    }

    /// Scan `span` for records whose primary-key serials are unreadable.
    ///
    /// `intact` maps the start offset of each intact row to its end; those
    /// rows are skipped. Returns nothing for tables without a leading
    /// primary key or without non-key columns.
    pub fn corrupted_rows(
        &self,
        data: &[u8],
        span: PageSpan,
        intact: &BTreeMap<usize, usize>,
    ) -> CorruptedScan {
        let mut scan = CorruptedScan::default();
        let pk = self.schema.pk_count();
        let readable = self.schema.column_count().saturating_sub(pk);
        if pk == 0 || readable == 0 || !self.schema.pk_is_prefix() {
            return scan;
        }

        let end = span.end_offset.min(data.len());
        let window = &data[..end];
        let mut offset = span.start_offset;

        while offset < end {
            if let Some(&row_end) = intact.get(&offset) {
                offset = row_end.max(offset + 1);
                continue;
            }
            scan.stats.offsets_tried += 1;

            let (serials, body) = match read_serials(window, offset, readable, read_varint) {
                Ok(v) => v,
                Err(e) => {
                    scan.stats.record_error(&e);
                    offset += 1;
                    continue;
                }
            };
            if body >= end {
                break;
            }
            if serials.iter().any(|&s| s > self.ceiling) {
                scan.stats.ceiling_rejects += 1;
                offset += 1;
                continue;
            }
            if !validate(&serials, &self.schema.columns, pk, self.policy).is_accepted() {
                scan.stats.invalid_header += 1;
                offset += 1;
                continue;
            }

            let mut alternatives = Vec::new();
            for shift in 0..=self.max_shift {
                match self.decode_payload(window, body + shift, &serials) {
                    Ok((values, row_end)) => alternatives.push(CandidateRow {
                        table_root: self.schema.root_page,
                        page: span.page_number,
                        start_offset: offset,
                        end_offset: row_end,
                        values,
                    }),
                    Err(e) => scan.stats.record_error(&e),
                }
            }
            if !alternatives.is_empty() {
                scan.groups.push(CorruptedGroup {
                    table_root: self.schema.root_page,
                    page: span.page_number,
                    header_offset: offset,
                    alternatives,
                });
            }

            offset += 1;
        }

        scan
    }
}

/// Read `count` serial type codes starting at `pos` with the given varint form.
///
/// Returns the codes and the offset just past them.
fn read_serials(
    buf: &[u8],
    mut pos: usize,
    count: usize,
    read: fn(&[u8], usize) -> Result<(u64, usize), SalvageError>,
) -> Result<(Vec<u64>, usize), SalvageError> {
    let mut serials = Vec::with_capacity(count);
    for _ in 0..count {
        let (serial, used) = read(buf, pos)?;
        serials.push(serial);
        pos += used;
    }
    Ok((serials, pos))
}
