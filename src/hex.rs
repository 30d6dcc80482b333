//! Fixed-width hex-ASCII field codec.
//!
//! Every DXR payload is a string of hex digit pairs, one pair per byte,
//! most significant byte first. Widths are fixed per command and checked
//! exactly; nothing here guesses a layout.

use std::collections::BTreeSet;
use std::fmt;

/// A payload that does not match the expected hex layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPayload {
    /// Byte offset (not character offset) where decoding failed.
    pub offset: usize,
    pub reason: String,
}

impl fmt::Display for MalformedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed payload at byte {}: {}", self.offset, self.reason)
    }
}

impl std::error::Error for MalformedPayload {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/// Decode one big-endian integer field of exactly `width` bytes.
pub fn decode_field(raw: &str, width: usize, signedness: Signedness) -> Result<i64, MalformedPayload> {
    if width == 0 || width > 7 {
        return Err(MalformedPayload {
            offset: 0,
            reason: format!("unsupported field width {width}"),
        });
    }
    let bytes = decode_bytes(raw)?;
    if bytes.len() != width {
        return Err(MalformedPayload {
            offset: bytes.len().min(width),
            reason: format!("expected {width} bytes, got {}", bytes.len()),
        });
    }
    let unsigned = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Ok(match signedness {
        Signedness::Unsigned => unsigned as i64,
        Signedness::Signed => {
            let shift = 64 - width * 8;
            ((unsigned << shift) as i64) >> shift
        }
    })
}

/// Encode `value` as exactly `width` bytes of uppercase hex.
///
/// Negative values are written in two's complement. Values that do not fit
/// are rejected rather than truncated.
pub fn encode_field(value: i64, width: usize) -> Result<String, MalformedPayload> {
    if width == 0 || width > 7 {
        return Err(MalformedPayload {
            offset: 0,
            reason: format!("unsupported field width {width}"),
        });
    }
    let bits = width * 8;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    if value < min || value > max {
        return Err(MalformedPayload {
            offset: 0,
            reason: format!("value {value} does not fit in {width} bytes"),
        });
    }
    let mask = (1u64 << bits) - 1;
    let digits = width * 2;
    Ok(format!("{:0digits$X}", (value as u64) & mask))
}

/// Decode a flag field of `bit_width` bits into the set of set bit positions.
/// Bit 0 is the least-significant bit of the last byte.
pub fn decode_flags(raw: &str, bit_width: usize) -> Result<BTreeSet<u8>, MalformedPayload> {
    if bit_width == 0 || bit_width % 8 != 0 || bit_width > 56 {
        return Err(MalformedPayload {
            offset: 0,
            reason: format!("unsupported flag width {bit_width}"),
        });
    }
    let value = decode_field(raw, bit_width / 8, Signedness::Unsigned)? as u64;
    Ok((0..bit_width as u8).filter(|bit| value & (1u64 << *bit) != 0).collect())
}

/// Decode a hex-ASCII text field, dropping NUL and space padding.
pub fn decode_str(raw: &str) -> Result<String, MalformedPayload> {
    let bytes = decode_bytes(raw)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
}

/// Decode a whole payload into raw bytes.
pub fn decode_bytes(raw: &str) -> Result<Vec<u8>, MalformedPayload> {
    let raw = raw.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(MalformedPayload {
            offset: raw.len() / 2,
            reason: format!("odd number of hex digits ({})", raw.len()),
        });
    }
    raw.chunks(2)
        .enumerate()
        .map(|(offset, pair)| match (nibble(pair[0]), nibble(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(MalformedPayload {
                offset,
                reason: format!("non-hex characters {:?}", String::from_utf8_lossy(pair)),
            }),
        })
        .collect()
}

fn nibble(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Sequential reader over a decoded payload that keeps byte offsets for
/// error reporting.
pub(crate) struct FieldReader {
    bytes: Vec<u8>,
    pos: usize,
}

impl FieldReader {
    pub fn new(raw: &str) -> Result<Self, MalformedPayload> {
        Ok(Self {
            bytes: decode_bytes(raw)?,
            pos: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn u8(&mut self) -> Result<u8, MalformedPayload> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| MalformedPayload {
            offset: self.pos,
            reason: "payload truncated".to_string(),
        })?;
        self.pos += 1;
        Ok(b)
    }

    pub fn u16(&mut self) -> Result<u16, MalformedPayload> {
        let hi = self.u8()?;
        let lo = self.u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Byte at an absolute offset, without moving the cursor.
    pub fn at(&self, offset: usize) -> Result<u8, MalformedPayload> {
        self.bytes.get(offset).copied().ok_or_else(|| MalformedPayload {
            offset,
            reason: "payload truncated".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_unsigned_fields() {
        assert_eq!(decode_field("2A", 1, Signedness::Unsigned).unwrap(), 42);
        assert_eq!(decode_field("01F4", 2, Signedness::Unsigned).unwrap(), 500);
        assert_eq!(decode_field("ff", 1, Signedness::Unsigned).unwrap(), 255);
    }

    #[test]
    fn decode_signed_fields() {
        assert_eq!(decode_field("FF", 1, Signedness::Signed).unwrap(), -1);
        assert_eq!(decode_field("F6", 1, Signedness::Signed).unwrap(), -10);
        assert_eq!(decode_field("7F", 1, Signedness::Signed).unwrap(), 127);
        assert_eq!(decode_field("FFFE", 2, Signedness::Signed).unwrap(), -2);
    }

    #[test]
    fn width_mismatch_is_malformed() {
        let err = decode_field("0102", 1, Signedness::Unsigned).unwrap_err();
        assert!(err.reason.contains("expected 1 bytes"));
        assert!(decode_field("", 1, Signedness::Unsigned).is_err());
    }

    #[test]
    fn non_hex_reports_offset() {
        let err = decode_bytes("00zz11").unwrap_err();
        assert_eq!(err.offset, 1);
        let err = decode_bytes("abc").unwrap_err();
        assert!(err.reason.contains("odd"));
    }

    #[test]
    fn encode_pads_and_uppercases() {
        assert_eq!(encode_field(2, 1).unwrap(), "02");
        assert_eq!(encode_field(500, 2).unwrap(), "01F4");
        assert_eq!(encode_field(-10, 1).unwrap(), "F6");
    }

    #[test]
    fn encode_rejects_overflow() {
        assert!(encode_field(256, 1).is_err());
        assert!(encode_field(-129, 1).is_err());
        assert!(encode_field(70_000, 2).is_err());
    }

    #[test]
    fn decode_then_encode_restores_bytes() {
        for raw in ["00", "7F", "80", "FF", "0000", "01F4", "FFFF", "A5C3E1"] {
            let width = raw.len() / 2;
            let value = decode_field(raw, width, Signedness::Unsigned).unwrap();
            assert_eq!(encode_field(value, width).unwrap(), raw);
        }
        for raw in ["F6", "80", "FFFE"] {
            let width = raw.len() / 2;
            let value = decode_field(raw, width, Signedness::Signed).unwrap();
            assert_eq!(encode_field(value, width).unwrap(), raw);
        }
    }

    #[test]
    fn flags_from_low_bits() {
        let flags = decode_flags("0009", 16).unwrap();
        assert_eq!(flags.into_iter().collect::<Vec<_>>(), vec![0, 3]);
        let flags = decode_flags("8000", 16).unwrap();
        assert_eq!(flags.into_iter().collect::<Vec<_>>(), vec![15]);
        assert!(decode_flags("0000", 16).unwrap().is_empty());
        assert!(decode_flags("00", 16).is_err());
    }

    #[test]
    fn strings_trim_padding() {
        assert_eq!(decode_str("4B69746368656E0000").unwrap(), "Kitchen");
        assert_eq!(decode_str("").unwrap(), "");
    }

    #[test]
    fn reader_tracks_offsets() {
        let mut r = FieldReader::new("0201F4FF").unwrap();
        assert_eq!(r.len(), 4);
        assert_eq!(r.u8().unwrap(), 2);
        assert_eq!(r.u16().unwrap(), 500);
        assert_eq!(r.u8().unwrap(), 0xFF);
        assert_eq!(r.remaining(), 0);
        let err = r.u8().unwrap_err();
        assert_eq!(err.offset, 4);
        assert_eq!(r.at(1).unwrap(), 0x01);
    }
}
