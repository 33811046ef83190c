//! Shared utilities (hex formatting, optional reading of an intact reference database).

pub mod hex;
#[cfg(feature = "sqlite")]
pub mod sqlite;
