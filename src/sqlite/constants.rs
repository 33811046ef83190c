/// SQLite file and page structure constants, plus carving defaults.
///
/// Header offsets follow the "Database File Format" document:
/// - 100-byte database header at the start of page 1
/// - b-tree page header (8 bytes on leaves, 12 on interior pages)
// Database header (100 bytes, page 1 only)
pub const DB_HEADER_SIZE: usize = 100;
pub const DB_HEADER_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const DB_PAGE_SIZE: usize = 16; // 2 bytes - page size (1 means 65536)
pub const DB_WRITE_VERSION: usize = 18; // 1 byte
pub const DB_READ_VERSION: usize = 19; // 1 byte
pub const DB_RESERVED_SPACE: usize = 20; // 1 byte - unused bytes at end of each page
pub const DB_CHANGE_COUNTER: usize = 24; // 4 bytes
pub const DB_PAGE_COUNT: usize = 28; // 4 bytes - in-header database size in pages
pub const DB_FREELIST_TRUNK: usize = 32; // 4 bytes - first freelist trunk page
pub const DB_FREELIST_COUNT: usize = 36; // 4 bytes - total freelist pages
pub const DB_SCHEMA_COOKIE: usize = 40; // 4 bytes
pub const DB_TEXT_ENCODING: usize = 56; // 4 bytes - 1 UTF-8, 2 UTF-16le, 3 UTF-16be
pub const DB_USER_VERSION: usize = 60; // 4 bytes
pub const DB_VERSION_VALID_FOR: usize = 92; // 4 bytes
pub const DB_SQLITE_VERSION: usize = 96; // 4 bytes

// Page sizes
pub const PAGE_SIZE_MIN: u32 = 512;
pub const PAGE_SIZE_MAX: u32 = 65536;
pub const PAGE_SIZE_MAX_MARKER: u16 = 1;

// B-tree page header
pub const BTREE_LEAF_HEADER_SIZE: usize = 8;
pub const BTREE_INTERIOR_HEADER_SIZE: usize = 12;

// B-tree page flags (first byte of the b-tree page header)
pub const PAGE_FLAG_INTERIOR_INDEX: u8 = 2;
pub const PAGE_FLAG_INTERIOR_TABLE: u8 = 5;
pub const PAGE_FLAG_LEAF_INDEX: u8 = 10;
pub const PAGE_FLAG_LEAF_TABLE: u8 = 13;

// Text encodings
pub const ENCODING_UTF8: u32 = 1;
pub const ENCODING_UTF16LE: u32 = 2;
pub const ENCODING_UTF16BE: u32 = 3;

// Serial type boundaries
pub const SERIAL_BLOB_MIN: u64 = 12;
pub const SERIAL_TEXT_MIN: u64 = 13;

// Varint limits
pub const HEADER_VARINT_MAX_BYTES: usize = 3;

// Carving defaults
pub const DEFAULT_SANITY_CEILING: u64 = 1_000_000;
pub const DEFAULT_PK_SHIFT_PER_COLUMN: usize = 8;
pub const DEFAULT_ZERO_WINDOW: usize = 100;
pub const DEFAULT_FIRST_UNKNOWN_PAGE: u32 = 2;
pub const DEFAULT_BATCH_SIZE: usize = 64;

// Content filter thresholds
pub const CONTROL_BYTE_LIMIT: u8 = 31;
pub const HIGH_BYTE_LIMIT: u8 = 160;
pub const ZERO_FILLER_BYTE: u8 = b'0';
