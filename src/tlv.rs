//! Primitive BER-TLV handling for the data objects exchanged with the chip.
//!
//! Secure messaging and the authentication protocols use a small set of
//! context-specific data objects (`0x7C` dynamic authentication data, `0x80`
//! through `0x8E` inside it, `0x97`/`0x99` in protected APDUs). These are
//! simple enough that pulling in a full DER codec would be overkill; the
//! helpers here read and write tags and lengths by hand. Full ASN.1 structures
//! (`EF.CardAccess`) are decoded with `rasn` instead.


use std::fmt;

use rasn::types::Oid;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    Malformed,
    UnexpectedTag { expected: u16, obtained: u16 },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed
                => write!(f, "malformed TLV structure"),
            Self::UnexpectedTag { expected, obtained }
                => write!(f, "expected tag 0x{:02X}, obtained 0x{:02X}", expected, obtained),
        }
    }
}
impl std::error::Error for Error {
}


/// Reads a tag (one or two bytes) from the beginning of the slice.
///
/// Returns the tag and the rest of the slice. Tags whose first byte has all
/// five lower bits set (e.g. `0x7F49`) continue into a second byte.
pub fn take_tag(input: &[u8]) -> Result<(u16, &[u8]), Error> {
    let first = *input.first().ok_or(Error::Malformed)?;
    if first & 0b0001_1111 == 0b0001_1111 {
        let second = *input.get(1).ok_or(Error::Malformed)?;
        if second & 0b1000_0000 != 0 {
            // tags longer than two bytes do not appear in this protocol
            return Err(Error::Malformed);
        }
        Ok((u16::from_be_bytes([first, second]), &input[2..]))
    } else {
        Ok((first.into(), &input[1..]))
    }
}

/// Reads a length (short or long form) from the beginning of the slice.
///
/// Returns the length and the rest of the slice.
pub fn take_length(input: &[u8]) -> Result<(usize, &[u8]), Error> {
    let first = *input.first().ok_or(Error::Malformed)?;
    if first & 0b1000_0000 == 0 {
        return Ok((first.into(), &input[1..]));
    }

    let length_byte_count: usize = (first & 0b0111_1111).into();
    if length_byte_count == 0 || length_byte_count > input.len() - 1 {
        return Err(Error::Malformed);
    }
    let mut length: usize = 0;
    for &length_byte in &input[1..1+length_byte_count] {
        length = length.checked_mul(256)
            .and_then(|l| l.checked_add(length_byte.into()))
            .ok_or(Error::Malformed)?;
    }
    Ok((length, &input[1+length_byte_count..]))
}

/// Appends a length in its canonical (definite, shortest) encoding.
pub fn write_length(output: &mut Vec<u8>, length: usize) {
    if length < 128 {
        output.push(length as u8);
        return;
    }

    let length_bytes = length.to_be_bytes();
    let mut trimmed = &length_bytes[..];
    while trimmed[0] == 0x00 {
        trimmed = &trimmed[1..];
    }
    output.push(0b1000_0000 | u8::try_from(trimmed.len()).unwrap());
    output.extend(trimmed);
}

/// Encodes a data object: tag, canonical length, value.
pub fn wrap(tag: u16, value: &[u8]) -> Vec<u8> {
    let mut ret = Vec::with_capacity(4 + value.len());
    append_wrapped(&mut ret, tag, value);
    ret
}

/// Appends a data object (tag, canonical length, value) to an existing buffer.
pub fn append_wrapped(output: &mut Vec<u8>, tag: u16, value: &[u8]) {
    if tag > 0xFF {
        output.push((tag >> 8) as u8);
    }
    output.push((tag & 0xFF) as u8);
    write_length(output, value.len());
    output.extend(value);
}

/// Decodes a data object that must carry the given tag and fill the entire
/// input.
pub fn unwrap(expected_tag: u16, input: &[u8]) -> Result<&[u8], Error> {
    let (tag, rest) = take_tag(input)?;
    if tag != expected_tag {
        return Err(Error::UnexpectedTag { expected: expected_tag, obtained: tag });
    }
    let (length, rest) = take_length(rest)?;
    if rest.len() != length {
        return Err(Error::Malformed);
    }
    Ok(rest)
}

/// Splits the first data object off the input.
///
/// Returns the tag, the value, and the rest of the input following the object.
pub fn take(input: &[u8]) -> Result<(u16, &[u8], &[u8]), Error> {
    let (tag, rest) = take_tag(input)?;
    let (length, rest) = take_length(rest)?;
    if rest.len() < length {
        return Err(Error::Malformed);
    }
    Ok((tag, &rest[..length], &rest[length..]))
}

/// Encodes an object identifier value (contents octets only, without the
/// `0x06` tag and length).
pub fn oid_value(oid: &Oid) -> Vec<u8> {
    fn write_arc(ret: &mut Vec<u8>, arc: u32) {
        let mut shift = 28;
        while shift > 0 {
            if arc >> shift != 0 {
                ret.push((((arc >> shift) & 0b0111_1111) as u8) | 0b1000_0000);
            }
            shift -= 7;
        }
        ret.push((arc & 0b0111_1111) as u8);
    }

    assert!(oid.len() >= 2);
    assert!(oid[0] <= 2);
    if oid[0] < 2 {
        assert!(oid[1] <= 39);
    }

    let mut ret = Vec::new();
    write_arc(&mut ret, 40*oid[0] + oid[1]);
    for &arc in oid.iter().skip(2) {
        write_arc(&mut ret, arc);
    }
    ret
}
