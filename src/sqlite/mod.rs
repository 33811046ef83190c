//! SQLite binary format decoding and record carving.
//!
//! This module contains the decoders for the on-disk structures a carver
//! needs (varints, record headers, serial-type payloads, the database
//! header), the byte-by-byte [`carver::RowCarver`], and the whole-file
//! [`scan::Scanner`] that attributes pages to tables.
//!
//! Start with [`database::DatabaseFile`] to open a file and
//! [`schema::SchemaCatalog`] to describe its tables.

pub mod carver;
pub mod constants;
pub mod database;
pub mod export;
pub mod page;
pub mod record;
pub mod scan;
pub mod schema;
pub mod serial;
pub mod varint;
