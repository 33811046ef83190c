//! Serial type codes and record-header validation.
//!
//! Every value in a record is described by a serial type code in the record
//! header. [`SerialType::from_code`] maps any code to the value kind and
//! content size it implies. [`validate`] decides whether a sequence of codes
//! read at some byte offset is consistent with a table's columns; it is the
//! gate that separates plausible record headers from accidental byte
//! patterns.
//!
//! | Code | Meaning | Content bytes |
//! |------|---------|---------------|
//! | 0 | NULL | 0 |
//! | 1–4 | signed big-endian integer | 1, 2, 3, 4 |
//! | 5 | signed big-endian integer | 6 |
//! | 6 | signed big-endian integer | 8 |
//! | 7 | IEEE 754 double | 8 |
//! | 8, 9 | constant 0, constant 1 | 0 |
//! | 10, 11 | reserved | 0 |
//! | even ≥ 12 | BLOB | (N-12)/2 |
//! | odd ≥ 13 | TEXT | (N-13)/2 |

use serde::{Deserialize, Serialize};

use crate::sqlite::constants::{SERIAL_BLOB_MIN, SERIAL_TEXT_MIN};
use crate::sqlite::schema::{Affinity, ColumnDef};

/// Value kind implied by a serial type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
    Null,
    Int8,
    Int16,
    Int24,
    Int32,
    Int48,
    Int64,
    Float64,
    Zero,
    One,
    /// Codes 10 and 11, reserved for internal use by the format.
    Reserved(u64),
    /// BLOB of the given byte length.
    Blob(u64),
    /// Text of the given byte length.
    Text(u64),
}

impl SerialType {
    /// Map a serial type code. The mapping is total.
    ///
    /// # Examples
    ///
    /// ```
    /// use salvage::sqlite::serial::SerialType;
    ///
    /// assert_eq!(SerialType::from_code(0), SerialType::Null);
    /// assert_eq!(SerialType::from_code(15), SerialType::Text(1));
    /// assert_eq!(SerialType::from_code(14), SerialType::Blob(1));
    /// assert_eq!(SerialType::from_code(5).content_size(), 6);
    /// ```
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => SerialType::Null,
            1 => SerialType::Int8,
            2 => SerialType::Int16,
            3 => SerialType::Int24,
            4 => SerialType::Int32,
            5 => SerialType::Int48,
            6 => SerialType::Int64,
            7 => SerialType::Float64,
            8 => SerialType::Zero,
            9 => SerialType::One,
            10 | 11 => SerialType::Reserved(code),
            n if n % 2 == 0 => SerialType::Blob((n - SERIAL_BLOB_MIN) / 2),
            n => SerialType::Text((n - SERIAL_TEXT_MIN) / 2),
        }
    }

    /// Number of content bytes the value occupies in the record body.
    pub fn content_size(&self) -> u64 {
        match self {
            SerialType::Null | SerialType::Zero | SerialType::One | SerialType::Reserved(_) => 0,
            SerialType::Int8 => 1,
            SerialType::Int16 => 2,
            SerialType::Int24 => 3,
            SerialType::Int32 => 4,
            SerialType::Int48 => 6,
            SerialType::Int64 | SerialType::Float64 => 8,
            SerialType::Blob(n) | SerialType::Text(n) => *n,
        }
    }
}

/// How closely serial types must match the declared column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Accept any storage class the type system permits for the affinity.
    #[default]
    Lenient,
    /// Assume columns hold what their type says (numbers in numeric
    /// columns, strings in text columns, blobs in untyped columns).
    Strict,
}

/// Outcome of validating a serial type sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Accepted,
    /// The serial at this index (into the serial sequence) failed its column.
    Rejected { index: usize },
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted)
    }
}

/// Check a serial type sequence against a table's columns.
///
/// `serials[i]` is paired with `columns[i + skip]`. The first failing pair
/// rejects the whole sequence; a sequence longer than the remaining columns
/// is rejected at the first serial without a column.
///
/// # Examples
///
/// ```
/// use salvage::sqlite::schema::ColumnDef;
/// use salvage::sqlite::serial::{validate, Validation, ValidationPolicy};
///
/// let text = ColumnDef {
///     position: 0,
///     name: "body".into(),
///     declared_type: "TEXT".into(),
///     not_null: false,
///     is_primary_key: false,
/// };
/// let cols = [text];
/// assert!(validate(&[15], &cols, 0, ValidationPolicy::Strict).is_accepted());
/// assert_eq!(
///     validate(&[14], &cols, 0, ValidationPolicy::Strict),
///     Validation::Rejected { index: 0 }
/// );
/// ```
pub fn validate(
    serials: &[u64],
    columns: &[ColumnDef],
    skip: usize,
    policy: ValidationPolicy,
) -> Validation {
    for (index, &serial) in serials.iter().enumerate() {
        let column = match columns.get(index + skip) {
            Some(c) => c,
            None => return Validation::Rejected { index },
        };
        if !accepts(serial, column.affinity(), column.nullable(), policy) {
            return Validation::Rejected { index };
        }
    }
    Validation::Accepted
}

/// Acceptance rule for one serial type against one column.
pub fn accepts(serial: u64, affinity: Affinity, nullable: bool, policy: ValidationPolicy) -> bool {
    if serial == 0 {
        return nullable;
    }
    match policy {
        ValidationPolicy::Lenient => match affinity {
            Affinity::Integer | Affinity::Real | Affinity::Numeric => serial < SERIAL_BLOB_MIN,
            Affinity::Blob => true,
            Affinity::Text => serial >= SERIAL_TEXT_MIN,
        },
        ValidationPolicy::Strict => match affinity {
            Affinity::Integer => matches!(serial, 1..=6 | 8 | 9),
            Affinity::Real => matches!(serial, 1..=5 | 7..=9),
            Affinity::Numeric => matches!(serial, 1..=9),
            Affinity::Blob => serial >= SERIAL_BLOB_MIN && serial % 2 == 0,
            Affinity::Text => serial >= SERIAL_TEXT_MIN && serial % 2 == 1,
        },
    }
}
