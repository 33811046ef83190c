//! Record payload decoding.
//!
//! Once a record header has been validated, each serial type code tells the
//! decoder how many body bytes to read and how to interpret them.
//! [`decode_value`] is the pure mapping from `(serial, bytes)` to a
//! [`DecodedValue`]. [`RecordDecoder`] wraps it with the content filters the
//! carver uses to throw away accidental matches: text that does not decode
//! under the database encoding, runs of ASCII `'0'` filler, and values
//! containing control bytes.
//!
//! # Integer encoding
//!
//! Integer serial types (1–6) are two's-complement big-endian, so a 1-byte
//! `0xFF` decodes to -1.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

use crate::sqlite::constants::*;
use crate::sqlite::serial::SerialType;
use crate::util::hex::format_bytes;
use crate::SalvageError;

/// A value decoded from a record body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Serialized as a lowercase hex string.
    Blob(#[serde(serialize_with = "serialize_hex")] Vec<u8>),
}

impl DecodedValue {
    /// Returns true if the value carries data (not NULL, not an empty string or blob).
    pub fn has_content(&self) -> bool {
        match self {
            DecodedValue::Null => false,
            DecodedValue::Text(s) => !s.is_empty(),
            DecodedValue::Blob(b) => !b.is_empty(),
            DecodedValue::Integer(_) | DecodedValue::Real(_) => true,
        }
    }

    /// Returns the SQL storage class name of the value.
    pub fn storage_class(&self) -> &'static str {
        match self {
            DecodedValue::Null => "NULL",
            DecodedValue::Integer(_) => "INTEGER",
            DecodedValue::Real(_) => "REAL",
            DecodedValue::Text(_) => "TEXT",
            DecodedValue::Blob(_) => "BLOB",
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Null => f.write_str("NULL"),
            DecodedValue::Integer(n) => write!(f, "{}", n),
            DecodedValue::Real(r) => write!(f, "{}", r),
            DecodedValue::Text(s) => f.write_str(s),
            DecodedValue::Blob(b) => write!(f, "x'{}'", format_bytes(b)),
        }
    }
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_bytes(bytes))
}

/// Text encoding declared in the database header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Map the header field value; unknown values fall back to UTF-8.
    pub fn from_header(value: u32) -> Self {
        match value {
            ENCODING_UTF16LE => TextEncoding::Utf16Le,
            ENCODING_UTF16BE => TextEncoding::Utf16Be,
            _ => TextEncoding::Utf8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16le",
            TextEncoding::Utf16Be => "UTF-16be",
        }
    }
}

/// Content heuristics applied to decoded text and blob values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextFilter {
    /// Text must decode under the database encoding.
    ValidText,
    /// Reject values made only of ASCII '0' bytes.
    ZeroFiller,
    /// Reject values containing control bytes outside the allow-list.
    ControlBytes,
    /// Keep only text starting with a CJK unified ideograph.
    CjkLeading,
}

impl TextFilter {
    /// The filters active unless configured otherwise.
    pub fn defaults() -> BTreeSet<TextFilter> {
        [
            TextFilter::ValidText,
            TextFilter::ZeroFiller,
            TextFilter::ControlBytes,
        ]
        .into_iter()
        .collect()
    }

    /// Parse a filter name as accepted on the command line.
    pub fn parse(s: &str) -> Result<Self, SalvageError> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "valid-text" => Ok(TextFilter::ValidText),
            "zero-filler" => Ok(TextFilter::ZeroFiller),
            "control-bytes" => Ok(TextFilter::ControlBytes),
            "cjk-leading" => Ok(TextFilter::CjkLeading),
            _ => Err(SalvageError::Argument(format!(
                "Unknown filter '{}'. Use valid-text, zero-filler, control-bytes, or cjk-leading.",
                s
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextFilter::ValidText => "valid-text",
            TextFilter::ZeroFiller => "zero-filler",
            TextFilter::ControlBytes => "control-bytes",
            TextFilter::CjkLeading => "cjk-leading",
        }
    }
}

/// Decode the value described by `serial` starting at `pos`.
///
/// Returns the value and the number of body bytes it occupies. Never reads
/// beyond that length. Text that is not valid under `encoding` is rejected
/// with [`SalvageError::RejectedContent`].
///
/// # Examples
///
/// ```
/// use salvage::sqlite::record::{decode_value, DecodedValue, TextEncoding};
///
/// let body = [0xFF, b'h', b'i'];
/// assert_eq!(
///     decode_value(1, &body, 0, TextEncoding::Utf8).unwrap(),
///     (DecodedValue::Integer(-1), 1)
/// );
/// assert_eq!(
///     decode_value(17, &body, 1, TextEncoding::Utf8).unwrap(),
///     (DecodedValue::Text("hi".into()), 2)
/// );
/// assert!(decode_value(19, &body, 1, TextEncoding::Utf8).is_err());
/// ```
pub fn decode_value(
    serial: u64,
    buf: &[u8],
    pos: usize,
    encoding: TextEncoding,
) -> Result<(DecodedValue, usize), SalvageError> {
    decode_with(serial, buf, pos, encoding, true)
}

fn decode_with(
    serial: u64,
    buf: &[u8],
    pos: usize,
    encoding: TextEncoding,
    require_valid_text: bool,
) -> Result<(DecodedValue, usize), SalvageError> {
    let st = SerialType::from_code(serial);
    let size = usize::try_from(st.content_size()).unwrap_or(usize::MAX);
    let bytes = match pos.checked_add(size).and_then(|end| buf.get(pos..end)) {
        Some(b) => b,
        None => {
            return Err(SalvageError::TruncatedInput {
                offset: pos,
                needed: size,
            })
        }
    };

    let value = match st {
        SerialType::Null => DecodedValue::Null,
        SerialType::Int8
        | SerialType::Int16
        | SerialType::Int24
        | SerialType::Int32
        | SerialType::Int48
        | SerialType::Int64 => DecodedValue::Integer(BigEndian::read_int(bytes, size)),
        SerialType::Float64 => DecodedValue::Real(BigEndian::read_f64(bytes)),
        SerialType::Zero => DecodedValue::Integer(0),
        SerialType::One => DecodedValue::Integer(1),
        SerialType::Reserved(code) => return Err(SalvageError::UnsupportedSerialType(code)),
        SerialType::Blob(_) => DecodedValue::Blob(bytes.to_vec()),
        SerialType::Text(_) => match decode_text(bytes, encoding) {
            Some(s) => DecodedValue::Text(s),
            None if require_valid_text => {
                return Err(SalvageError::RejectedContent(TextFilter::ValidText))
            }
            None => DecodedValue::Text(decode_text_lossy(bytes, encoding)),
        },
    };

    Ok((value, size))
}

fn utf16_units(bytes: &[u8], encoding: TextEncoding) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| match encoding {
            TextEncoding::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
            _ => u16::from_be_bytes([pair[0], pair[1]]),
        })
        .collect()
}

fn decode_text(bytes: &[u8], encoding: TextEncoding) -> Option<String> {
    match encoding {
        TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            if bytes.len() % 2 != 0 {
                return None;
            }
            String::from_utf16(&utf16_units(bytes, encoding)).ok()
        }
    }
}

fn decode_text_lossy(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            String::from_utf16_lossy(&utf16_units(bytes, encoding))
        }
    }
}

/// Payload decoder with content filters applied.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    encoding: TextEncoding,
    valid_text: bool,
    zero_filler: bool,
    control_bytes: bool,
    cjk_leading: bool,
    control_allow: Vec<u8>,
}

impl RecordDecoder {
    /// Build a decoder for the given encoding and active filters.
    ///
    /// `control_allow` lists control bytes that the
    /// [`TextFilter::ControlBytes`] filter lets through.
    pub fn new(encoding: TextEncoding, filters: &BTreeSet<TextFilter>, control_allow: &[u8]) -> Self {
        RecordDecoder {
            encoding,
            valid_text: filters.contains(&TextFilter::ValidText),
            zero_filler: filters.contains(&TextFilter::ZeroFiller),
            control_bytes: filters.contains(&TextFilter::ControlBytes),
            cjk_leading: filters.contains(&TextFilter::CjkLeading),
            control_allow: control_allow.to_vec(),
        }
    }

    /// Decode one value and run it through the active filters.
    pub fn decode(
        &self,
        serial: u64,
        buf: &[u8],
        pos: usize,
    ) -> Result<(DecodedValue, usize), SalvageError> {
        let (value, used) = decode_with(serial, buf, pos, self.encoding, self.valid_text)?;
        self.check(&value)?;
        Ok((value, used))
    }

    /// Run the active filters over an already decoded value.
    pub fn check(&self, value: &DecodedValue) -> Result<(), SalvageError> {
        match value {
            DecodedValue::Text(s) => {
                if self.zero_filler && !s.is_empty() && s.bytes().all(|b| b == ZERO_FILLER_BYTE) {
                    return Err(SalvageError::RejectedContent(TextFilter::ZeroFiller));
                }
                if self.control_bytes && s.chars().any(|c| self.is_control_char(c)) {
                    return Err(SalvageError::RejectedContent(TextFilter::ControlBytes));
                }
                if self.cjk_leading && !s.chars().next().is_some_and(is_cjk_ideograph) {
                    return Err(SalvageError::RejectedContent(TextFilter::CjkLeading));
                }
            }
            DecodedValue::Blob(b) => {
                if self.zero_filler && !b.is_empty() && b.iter().all(|&x| x == ZERO_FILLER_BYTE) {
                    return Err(SalvageError::RejectedContent(TextFilter::ZeroFiller));
                }
                if self.control_bytes && b.iter().any(|&x| self.is_control_byte(x)) {
                    return Err(SalvageError::RejectedContent(TextFilter::ControlBytes));
                }
            }
            DecodedValue::Null | DecodedValue::Integer(_) | DecodedValue::Real(_) => {}
        }
        Ok(())
    }

    fn is_control_byte(&self, b: u8) -> bool {
        b > HIGH_BYTE_LIMIT || (b < CONTROL_BYTE_LIMIT && !self.control_allow.contains(&b))
    }

    fn is_control_char(&self, c: char) -> bool {
        let code = c as u32;
        if code < CONTROL_BYTE_LIMIT as u32 {
            return !self.control_allow.contains(&(code as u8));
        }
        // DEL and the C1 control block
        (0x7F..=0x9F).contains(&code)
    }
}

fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}
