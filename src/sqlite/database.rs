//! Database file access.
//!
//! [`DatabaseFile`] is the entry point for reading a (possibly damaged)
//! SQLite file. The whole file is held either as an owned buffer or as a
//! read-only memory map, so pages are plain `&[u8]` slices that any number of
//! worker threads can carve at once without seeking.
//!
//! Only two header fields are needed for carving: the page size at offset 16
//! and the text encoding at offset 56. [`DatabaseHeader`] parses the rest of
//! the 100-byte header for display.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::Deref;

use crate::sqlite::constants::*;
use crate::sqlite::page::{PageKind, PageSpan};
use crate::sqlite::record::TextEncoding;
use crate::SalvageError;

/// Parsed 100-byte database header from the start of page 1.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHeader {
    /// True when the file starts with "SQLite format 3\0".
    pub magic_valid: bool,
    /// Raw page size field (1 means 65536).
    pub raw_page_size: u16,
    pub write_version: u8,
    pub read_version: u8,
    /// Unused bytes reserved at the end of each page.
    pub reserved_space: u8,
    pub change_counter: u32,
    /// Database size in pages as recorded in the header.
    pub page_count: u32,
    pub freelist_trunk: u32,
    pub freelist_count: u32,
    pub schema_cookie: u32,
    pub text_encoding: u32,
    pub user_version: u32,
    pub version_valid_for: u32,
    pub sqlite_version: u32,
}

impl DatabaseHeader {
    /// Parse the header from the first bytes of the file.
    ///
    /// Returns `None` if fewer than 100 bytes are available.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DB_HEADER_SIZE {
            return None;
        }
        Some(DatabaseHeader {
            magic_valid: &data[..DB_HEADER_MAGIC.len()] == DB_HEADER_MAGIC,
            raw_page_size: BigEndian::read_u16(&data[DB_PAGE_SIZE..]),
            write_version: data[DB_WRITE_VERSION],
            read_version: data[DB_READ_VERSION],
            reserved_space: data[DB_RESERVED_SPACE],
            change_counter: BigEndian::read_u32(&data[DB_CHANGE_COUNTER..]),
            page_count: BigEndian::read_u32(&data[DB_PAGE_COUNT..]),
            freelist_trunk: BigEndian::read_u32(&data[DB_FREELIST_TRUNK..]),
            freelist_count: BigEndian::read_u32(&data[DB_FREELIST_COUNT..]),
            schema_cookie: BigEndian::read_u32(&data[DB_SCHEMA_COOKIE..]),
            text_encoding: BigEndian::read_u32(&data[DB_TEXT_ENCODING..]),
            user_version: BigEndian::read_u32(&data[DB_USER_VERSION..]),
            version_valid_for: BigEndian::read_u32(&data[DB_VERSION_VALID_FOR..]),
            sqlite_version: BigEndian::read_u32(&data[DB_SQLITE_VERSION..]),
        })
    }

    /// Page size implied by the raw field, if it is a legal value.
    pub fn page_size(&self) -> Option<u32> {
        let size = if self.raw_page_size == PAGE_SIZE_MAX_MARKER {
            PAGE_SIZE_MAX
        } else {
            self.raw_page_size as u32
        };
        if size.is_power_of_two() && (PAGE_SIZE_MIN..=PAGE_SIZE_MAX).contains(&size) {
            Some(size)
        } else {
            None
        }
    }

    /// SQLite library version number formatted as "major.minor.patch".
    pub fn sqlite_version_string(&self) -> String {
        let v = self.sqlite_version;
        format!("{}.{}.{}", v / 1_000_000, (v / 1000) % 1000, v % 1000)
    }
}

enum Storage {
    Owned(Vec<u8>),
    Mapped(memmap2::Mmap),
}

impl Deref for Storage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Mapped(m) => m,
        }
    }
}

/// An open database file (or in-memory image).
pub struct DatabaseFile {
    data: Storage,
    page_size: u32,
    page_count: u32,
    encoding: TextEncoding,
    header: Option<DatabaseHeader>,
}

impl DatabaseFile {
    /// Read a database file into memory and detect its page size.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self, SalvageError> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| SalvageError::Io(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::init(Storage::Owned(data), None)
    }

    /// Open a database file with a specific page size (bypass detection).
    pub fn open_with_page_size<P: AsRef<std::path::Path>>(
        path: P,
        page_size: u32,
    ) -> Result<Self, SalvageError> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| SalvageError::Io(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::init(Storage::Owned(data), Some(page_size))
    }

    /// Open a database file using memory-mapped I/O.
    ///
    /// Only the pages actually carved are faulted in, which keeps memory
    /// use flat for large files. `page_size` bypasses detection when set.
    ///
    /// # Safety
    ///
    /// The mapping is read-only, but the file must not be truncated by
    /// another process while it is mapped. Carve a copy of a database that
    /// is still in use.
    pub fn open_mmap<P: AsRef<std::path::Path>>(
        path: P,
        page_size: Option<u32>,
    ) -> Result<Self, SalvageError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| SalvageError::Io(format!("Cannot open {}: {}", path.display(), e)))?;

        let mmap = unsafe {
            memmap2::Mmap::map(&file)
                .map_err(|e| SalvageError::Io(format!("Cannot mmap {}: {}", path.display(), e)))?
        };

        Self::init(Storage::Mapped(mmap), page_size)
    }

    /// Create a database from an in-memory image with auto-detected page size.
    ///
    /// # Examples
    ///
    /// ```
    /// use salvage::sqlite::database::DatabaseFile;
    ///
    /// let mut image = vec![0u8; 1024];
    /// image[..16].copy_from_slice(b"SQLite format 3\0");
    /// image[16..18].copy_from_slice(&512u16.to_be_bytes());
    ///
    /// let db = DatabaseFile::from_bytes(image).unwrap();
    /// assert_eq!(db.page_size(), 512);
    /// assert_eq!(db.page_count(), 2);
    /// ```
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, SalvageError> {
        Self::init(Storage::Owned(data), None)
    }

    /// Create a database from an in-memory image with a specific page size.
    pub fn from_bytes_with_page_size(data: Vec<u8>, page_size: u32) -> Result<Self, SalvageError> {
        Self::init(Storage::Owned(data), Some(page_size))
    }

    fn init(data: Storage, forced_page_size: Option<u32>) -> Result<Self, SalvageError> {
        let header = DatabaseHeader::parse(&data);

        let page_size = match forced_page_size {
            Some(0) => {
                return Err(SalvageError::Argument(
                    "Page size must be greater than zero".to_string(),
                ))
            }
            Some(ps) => ps,
            None => {
                let hdr = header.as_ref().ok_or_else(|| {
                    SalvageError::Parse(format!(
                        "File too small to hold a database header: {} bytes",
                        data.len()
                    ))
                })?;
                hdr.page_size().ok_or_else(|| {
                    SalvageError::Parse(format!(
                        "Invalid page size field {} (use --page-size to override)",
                        hdr.raw_page_size
                    ))
                })?
            }
        };

        if let Some(hdr) = &header {
            if !hdr.magic_valid {
                tracing::warn!("database header magic is missing or damaged");
            }
        }

        let encoding = header
            .as_ref()
            .map(|h| TextEncoding::from_header(h.text_encoding))
            .unwrap_or_default();

        // A trailing partial page is still carved.
        let page_count = u32::try_from(data.len().div_ceil(page_size as usize)).map_err(|_| {
            SalvageError::Argument(format!(
                "File of {} bytes has too many pages for page size {}",
                data.len(),
                page_size
            ))
        })?;

        tracing::debug!(page_size, page_count, encoding = encoding.name(), "opened database");

        Ok(DatabaseFile {
            data,
            page_size,
            page_count,
            encoding,
            header,
        })
    }

    /// Returns the detected or configured page size.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Returns the number of pages in the file, counting a trailing partial page.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Returns the file size in bytes.
    pub fn file_size(&self) -> usize {
        self.data.len()
    }

    pub fn text_encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Returns the parsed database header, if the file is large enough.
    pub fn header(&self) -> Option<&DatabaseHeader> {
        self.header.as_ref()
    }

    /// Returns the whole file contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte range of a 1-based page number.
    pub fn span(&self, page: u32) -> Result<PageSpan, SalvageError> {
        if page == 0 || page > self.page_count {
            return Err(SalvageError::Io(format!(
                "Page {} out of range (database has {} pages)",
                page, self.page_count
            )));
        }
        let ps = self.page_size as usize;
        let start = (page as usize - 1) * ps;
        let end = (start + ps).min(self.data.len());
        Ok(PageSpan {
            page_number: page,
            start_offset: start,
            end_offset: end,
        })
    }

    /// Contents of a 1-based page number.
    pub fn page(&self, page: u32) -> Result<&[u8], SalvageError> {
        let span = self.span(page)?;
        Ok(&self.data[span.start_offset..span.end_offset])
    }

    /// Offset of the b-tree header within a page (after the file header on page 1).
    fn btree_header_offset(page: u32) -> usize {
        if page == 1 {
            DB_HEADER_SIZE
        } else {
            0
        }
    }

    /// Classify a page from its b-tree flag byte.
    pub fn page_kind(&self, page: u32) -> Result<PageKind, SalvageError> {
        let data = self.page(page)?;
        Ok(data
            .get(Self::btree_header_offset(page))
            .map(|&flag| PageKind::from_flag(flag))
            .unwrap_or(PageKind::Unknown))
    }

    /// The part of a page worth carving: everything after the b-tree page
    /// header (and after the file header on page 1).
    pub fn carve_range(&self, page: u32) -> Result<PageSpan, SalvageError> {
        let mut span = self.span(page)?;
        let kind = self.page_kind(page)?;
        let skip = Self::btree_header_offset(page) + kind.header_size();
        span.start_offset = (span.start_offset + skip).min(span.end_offset);
        Ok(span)
    }

    /// Pages that plausibly belong to the table rooted at `root`.
    ///
    /// Interior pages store 4-byte big-endian child page numbers, so small
    /// page numbers show up as the byte pattern `00 00 nn` inside the root
    /// page. Every such `nn` other than 0 and 1 is returned. The root itself
    /// is not included. The match is a heuristic and only finds pages below
    /// 256.
    pub fn pages_for_root(&self, root: u32) -> Result<BTreeSet<u32>, SalvageError> {
        let data = self.page(root)?;
        Ok(data
            .windows(3)
            .filter(|w| w[0] == 0 && w[1] == 0 && w[2] > 1)
            .map(|w| w[2] as u32)
            .collect())
    }

    /// True if the last `window` bytes of the page are all zero.
    pub fn trailing_zeros(&self, page: u32, window: usize) -> Result<bool, SalvageError> {
        let data = self.page(page)?;
        let start = data.len().saturating_sub(window);
        Ok(data[start..].iter().all(|&b| b == 0))
    }
}
