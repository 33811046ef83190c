//! Page geometry and b-tree page classification.
//!
//! A [`PageSpan`] is the half-open byte range a page (or the carvable part of
//! a page) occupies in the file. [`PageKind`] classifies a page from the flag
//! byte at the start of its b-tree header; only leaf-table pages and pages
//! that carry no recognizable flag (freed, overflow, or overwritten pages)
//! can hold record payloads worth carving.

use serde::Serialize;
use std::fmt;

use crate::sqlite::constants::*;

/// Byte range `[start_offset, end_offset)` of a page within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageSpan {
    /// 1-based page number.
    pub page_number: u32,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl PageSpan {
    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start_offset && offset < self.end_offset
    }
}

/// Kind of b-tree page, from the page flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PageKind {
    InteriorIndex,
    InteriorTable,
    LeafIndex,
    LeafTable,
    /// No b-tree flag: freelist, overflow, or overwritten page.
    Unknown,
}

impl PageKind {
    /// Classify a b-tree page flag byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use salvage::sqlite::page::PageKind;
    ///
    /// assert_eq!(PageKind::from_flag(13), PageKind::LeafTable);
    /// assert_eq!(PageKind::from_flag(5), PageKind::InteriorTable);
    /// assert_eq!(PageKind::from_flag(0), PageKind::Unknown);
    /// ```
    pub fn from_flag(flag: u8) -> Self {
        match flag {
            PAGE_FLAG_INTERIOR_INDEX => PageKind::InteriorIndex,
            PAGE_FLAG_INTERIOR_TABLE => PageKind::InteriorTable,
            PAGE_FLAG_LEAF_INDEX => PageKind::LeafIndex,
            PAGE_FLAG_LEAF_TABLE => PageKind::LeafTable,
            _ => PageKind::Unknown,
        }
    }

    /// Whether table record payloads can appear on this kind of page.
    pub fn may_hold_rows(&self) -> bool {
        matches!(self, PageKind::LeafTable | PageKind::Unknown)
    }

    /// Size of the b-tree page header that precedes the cell area.
    pub fn header_size(&self) -> usize {
        match self {
            PageKind::LeafIndex | PageKind::LeafTable => BTREE_LEAF_HEADER_SIZE,
            PageKind::InteriorIndex | PageKind::InteriorTable => BTREE_INTERIOR_HEADER_SIZE,
            PageKind::Unknown => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PageKind::InteriorIndex => "INTERIOR_INDEX",
            PageKind::InteriorTable => "INTERIOR_TABLE",
            PageKind::LeafIndex => "LEAF_INDEX",
            PageKind::LeafTable => "LEAF_TABLE",
            PageKind::Unknown => "UNKNOWN",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PageKind::InteriorIndex => "Index b-tree interior page",
            PageKind::InteriorTable => "Table b-tree interior page",
            PageKind::LeafIndex => "Index b-tree leaf page",
            PageKind::LeafTable => "Table b-tree leaf page",
            PageKind::Unknown => "Free, overflow, or unrecognized page",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
