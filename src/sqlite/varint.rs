//! Variable-length integer decoding.
//!
//! Two encodings appear in the record structures this crate carves:
//!
//! - The general 1–9 byte varint ([`read_varint`]), where the first byte
//!   selects the width: values up to 240 fit in one byte, 241–248 and 249
//!   start two- and three-byte forms, and 250–255 prefix a 3–8 byte
//!   big-endian integer.
//! - The short radix-128 form ([`read_header_length_varint`]) used for
//!   header-length and serial-type fields, where the high bit of each byte
//!   marks a continuation and at most three bytes are read.
//!
//! Both decoders read from an arbitrary position in a byte slice and return
//! the value together with the number of bytes consumed.

use byteorder::{BigEndian, ByteOrder};

use crate::sqlite::constants::HEADER_VARINT_MAX_BYTES;
use crate::SalvageError;

/// Decode a general varint at `pos`.
///
/// Returns `(value, bytes_consumed)`, where `bytes_consumed` is 1..=9.
///
/// # Examples
///
/// ```
/// use salvage::sqlite::varint::read_varint;
///
/// assert_eq!(read_varint(&[0xF0], 0).unwrap(), (240, 1));
/// assert_eq!(read_varint(&[0xF1, 0x00], 0).unwrap(), (240, 2));
/// assert_eq!(read_varint(&[0xF9, 0x01, 0x02], 0).unwrap(), (2288 + 258, 3));
/// assert!(read_varint(&[0xFA, 0x01], 0).is_err());
/// ```
pub fn read_varint(buf: &[u8], pos: usize) -> Result<(u64, usize), SalvageError> {
    let a0 = *buf
        .get(pos)
        .ok_or(SalvageError::TruncatedInput { offset: pos, needed: 1 })?;

    match a0 {
        0..=240 => Ok((a0 as u64, 1)),
        241..=248 => {
            let rest = take(buf, pos + 1, 1)?;
            Ok((240 + 256 * (a0 as u64 - 241) + rest[0] as u64, 2))
        }
        249 => {
            let rest = take(buf, pos + 1, 2)?;
            Ok((2288 + 256 * rest[0] as u64 + rest[1] as u64, 3))
        }
        _ => {
            // 250 => 3 bytes, ..., 255 => 8 bytes
            let width = (a0 - 247) as usize;
            let rest = take(buf, pos + 1, width)?;
            Ok((BigEndian::read_uint(rest, width), width + 1))
        }
    }
}

/// Decode a radix-128 header-length varint at `pos`.
///
/// Each byte contributes its low seven bits; a byte of 127 or less ends the
/// value. When three bytes pass without a terminator the field is rejected
/// with [`SalvageError::InvalidHeader`] rather than returning a partial
/// value.
///
/// # Examples
///
/// ```
/// use salvage::sqlite::varint::read_header_length_varint;
///
/// assert_eq!(read_header_length_varint(&[0x0F], 0).unwrap(), (15, 1));
/// assert_eq!(read_header_length_varint(&[0x81, 0x00], 0).unwrap(), (128, 2));
/// assert!(read_header_length_varint(&[0x80, 0x80, 0x80], 0).is_err());
/// ```
pub fn read_header_length_varint(buf: &[u8], pos: usize) -> Result<(u64, usize), SalvageError> {
    let mut value = 0u64;
    for i in 0..HEADER_VARINT_MAX_BYTES {
        let byte = *buf.get(pos + i).ok_or(SalvageError::TruncatedInput {
            offset: pos + i,
            needed: 1,
        })?;
        value = (value << 7) | (byte & 0x7F) as u64;
        if byte <= 0x7F {
            return Ok((value, i + 1));
        }
    }
    Err(SalvageError::InvalidHeader(
        "header-length varint has no terminating byte",
    ))
}

/// Encode a value in the general varint form accepted by [`read_varint`].
///
/// Always produces the shortest encoding.
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value <= 240 {
        return vec![value as u8];
    }
    if value <= 2287 {
        let v = value - 240;
        return vec![(v / 256 + 241) as u8, (v % 256) as u8];
    }
    if value <= 67823 {
        let v = value - 2288;
        return vec![249, (v / 256) as u8, (v % 256) as u8];
    }

    let width = (3..=8usize)
        .find(|&w| w == 8 || value < 1u64 << (8 * w))
        .unwrap_or(8);
    let mut out = vec![(247 + width) as u8];
    let mut be = [0u8; 8];
    BigEndian::write_u64(&mut be, value);
    out.extend_from_slice(&be[8 - width..]);
    out
}

/// Encode a value in the radix-128 form accepted by [`read_header_length_varint`].
///
/// Returns `None` for values that need more than three bytes (2^21 and up).
pub fn encode_header_length_varint(value: u64) -> Option<Vec<u8>> {
    match value {
        0..=0x7F => Some(vec![value as u8]),
        0x80..=0x3FFF => Some(vec![0x80 | (value >> 7) as u8, (value & 0x7F) as u8]),
        0x4000..=0x1F_FFFF => Some(vec![
            0x80 | (value >> 14) as u8,
            0x80 | ((value >> 7) & 0x7F) as u8,
            (value & 0x7F) as u8,
        ]),
        _ => None,
    }
}

fn take(buf: &[u8], pos: usize, len: usize) -> Result<&[u8], SalvageError> {
    buf.get(pos..pos + len)
        .ok_or(SalvageError::TruncatedInput { offset: pos, needed: len })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64, expected_len: usize) {
        let encoded = encode_varint(value);
        assert_eq!(encoded.len(), expected_len, "encoded length of {}", value);
        let (decoded, used) = read_varint(&encoded, 0).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(used, expected_len);
    }

    #[test]
    fn test_varint_boundaries() {
        round_trip(0, 1);
        round_trip(240, 1);
        round_trip(241, 2);
        round_trip(2287, 2);
        round_trip(2288, 3);
        round_trip(67823, 3);
        round_trip(67824, 4);
        round_trip((1 << 24) - 1, 4);
        round_trip(1 << 24, 5);
        round_trip(u32::MAX as u64, 5);
        round_trip(1 << 32, 6);
        round_trip((1 << 56) - 1, 8);
        round_trip(u64::MAX, 9);
    }

    #[test]
    fn test_varint_wide_forms_are_big_endian() {
        assert_eq!(read_varint(&[250, 0x01, 0x02, 0x03], 0).unwrap(), (0x010203, 4));
        assert_eq!(
            read_varint(&[251, 0xDE, 0xAD, 0xBE, 0xEF], 0).unwrap(),
            (0xDEADBEEF, 5)
        );
        let nine = [255, 1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(read_varint(&nine, 0).unwrap(), (0x0102030405060708, 9));
    }

    #[test]
    fn test_varint_reads_at_offset() {
        let buf = [0xAA, 0xBB, 0xF2, 0x10];
        assert_eq!(read_varint(&buf, 2).unwrap(), (240 + 256 + 0x10, 2));
    }

    #[test]
    fn test_varint_truncated() {
        for buf in [&[][..], &[0xF1][..], &[0xF9, 0x00][..], &[0xFF, 1, 2, 3][..]] {
            match read_varint(buf, 0) {
                Err(SalvageError::TruncatedInput { .. }) => {}
                other => panic!("expected TruncatedInput for {:?}, got {:?}", buf, other),
            }
        }
        assert!(read_varint(&[0x05], 1).is_err());
    }

    #[test]
    fn test_header_length_varint_one_two_three_bytes() {
        assert_eq!(read_header_length_varint(&[0x00], 0).unwrap(), (0, 1));
        assert_eq!(read_header_length_varint(&[0x7F], 0).unwrap(), (127, 1));
        assert_eq!(read_header_length_varint(&[0x81, 0x01], 0).unwrap(), (129, 2));
        assert_eq!(read_header_length_varint(&[0xFF, 0x7F], 0).unwrap(), (0x3FFF, 2));
        assert_eq!(
            read_header_length_varint(&[0x81, 0x80, 0x00], 0).unwrap(),
            (1 << 14, 3)
        );
        assert_eq!(
            read_header_length_varint(&[0xFF, 0xFF, 0x7F], 0).unwrap(),
            (0x1F_FFFF, 3)
        );
    }

    #[test]
    fn test_header_length_varint_without_terminator() {
        match read_header_length_varint(&[0x80, 0x81, 0xFF, 0x01], 0) {
            Err(SalvageError::InvalidHeader(_)) => {}
            other => panic!("expected InvalidHeader, got {:?}", other),
        }
    }

    #[test]
    fn test_header_length_varint_truncated() {
        match read_header_length_varint(&[0x80, 0x81], 0) {
            Err(SalvageError::TruncatedInput { offset: 2, .. }) => {}
            other => panic!("expected TruncatedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_header_length_encoding_matches_decoder() {
        for value in [0u64, 1, 127, 128, 300, 0x3FFF, 0x4000, 0x1F_FFFF] {
            let encoded = encode_header_length_varint(value).unwrap();
            let (decoded, used) = read_header_length_varint(&encoded, 0).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, encoded.len());
        }
        assert!(encode_header_length_varint(0x20_0000).is_none());
    }
}
