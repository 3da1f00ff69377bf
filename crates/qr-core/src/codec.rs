//! Positional binary grammar shared by every blob-oriented backend.
//!
//! The format is not self-describing: readers must consume fields in exactly the
//! order writers produced them.
//!
//! | Item | Encoding |
//! |------|----------|
//! | `u8` / flag | one byte, flags are `0` or `1` |
//! | `u32`, `u64`, `i32`, `f32` | fixed width, little endian |
//! | string | `u32` byte length, then UTF-8 bytes |
//! | sequence | `u32` item count, then items |
//! | date | `i32` days from the common era |
//! | optional section | flag, then the payload only when the flag is `1` |

use std::io::{Read, Write};

use chrono::{Datelike, NaiveDate};

use crate::error::CodecError;

/// Upper bound for a single string payload.
pub const MAX_STRING_LEN: usize = 1 << 20;
/// Upper bound for a single sequence count.
pub const MAX_SEQUENCE_LEN: usize = 1 << 24;

/// Capacity reserved up front while decoding; longer sequences grow on demand.
const PREALLOCATE_LIMIT: usize = 4_096;

pub trait Encode {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError>;

    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer)?;
        Ok(buffer)
    }
}

pub trait Decode: Sized {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError>;

    /// Decode a complete value, rejecting leftover bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = bytes;
        let value = Self::decode(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(CodecError::TrailingBytes {
                count: cursor.len(),
            });
        }
        Ok(value)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        match self {
            Some(value) => {
                write_bool(writer, true)?;
                value.encode(writer)
            }
            None => write_bool(writer, false),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        if read_bool(reader)? {
            T::decode(reader).map(Some)
        } else {
            Ok(None)
        }
    }
}

pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> Result<(), CodecError> {
    writer.write_all(&[value])?;
    Ok(())
}

pub fn write_bool<W: Write>(writer: &mut W, value: bool) -> Result<(), CodecError> {
    write_u8(writer, u8::from(value))
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<(), CodecError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<(), CodecError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<(), CodecError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_f32<W: Write>(writer: &mut W, value: f32) -> Result<(), CodecError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_bounded_len<W: Write>(
    writer: &mut W,
    what: &'static str,
    len: usize,
    max: usize,
) -> Result<(), CodecError> {
    if len > max {
        return Err(CodecError::LengthTooLarge { what, len, max });
    }
    // both limits fit in u32
    write_u32(writer, len as u32)
}

/// Write a sequence count, enforcing the same limit the reader applies.
pub fn write_len<W: Write>(writer: &mut W, what: &'static str, len: usize) -> Result<(), CodecError> {
    write_bounded_len(writer, what, len, MAX_SEQUENCE_LEN)
}

pub fn write_str<W: Write>(writer: &mut W, value: &str) -> Result<(), CodecError> {
    write_bounded_len(writer, "string", value.len(), MAX_STRING_LEN)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

pub fn write_date<W: Write>(writer: &mut W, value: NaiveDate) -> Result<(), CodecError> {
    write_i32(writer, value.num_days_from_ce())
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N], CodecError> {
    let mut buffer = [0_u8; N];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8, CodecError> {
    let [value] = read_array::<R, 1>(reader)?;
    Ok(value)
}

pub fn read_bool<R: Read>(reader: &mut R) -> Result<bool, CodecError> {
    match read_u8(reader)? {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(CodecError::InvalidFlag { value }),
    }
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, CodecError> {
    read_array(reader).map(u32::from_le_bytes)
}

pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64, CodecError> {
    read_array(reader).map(u64::from_le_bytes)
}

pub fn read_i32<R: Read>(reader: &mut R) -> Result<i32, CodecError> {
    read_array(reader).map(i32::from_le_bytes)
}

pub fn read_f32<R: Read>(reader: &mut R) -> Result<f32, CodecError> {
    read_array(reader).map(f32::from_le_bytes)
}

fn read_bounded_len<R: Read>(
    reader: &mut R,
    what: &'static str,
    max: usize,
) -> Result<usize, CodecError> {
    let len = read_u32(reader)? as usize;
    if len > max {
        return Err(CodecError::LengthTooLarge { what, len, max });
    }
    Ok(len)
}

pub fn read_len<R: Read>(reader: &mut R, what: &'static str) -> Result<usize, CodecError> {
    read_bounded_len(reader, what, MAX_SEQUENCE_LEN)
}

pub fn read_str<R: Read>(reader: &mut R) -> Result<String, CodecError> {
    let len = read_bounded_len(reader, "string", MAX_STRING_LEN)?;
    let mut buffer = vec![0_u8; len];
    reader.read_exact(&mut buffer)?;
    String::from_utf8(buffer).map_err(|_| CodecError::InvalidUtf8)
}

pub fn read_date<R: Read>(reader: &mut R) -> Result<NaiveDate, CodecError> {
    let days = read_i32(reader)?;
    NaiveDate::from_num_days_from_ce_opt(days).ok_or(CodecError::InvalidDate { days })
}

/// Read a count-prefixed sequence of homogeneous items.
pub fn read_seq<R: Read, T: Decode>(reader: &mut R, what: &'static str) -> Result<Vec<T>, CodecError> {
    let len = read_len(reader, what)?;
    let mut items = Vec::with_capacity(len.min(PREALLOCATE_LIMIT));
    for _ in 0..len {
        items.push(T::decode(reader)?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_length_prefixed_little_endian() {
        let mut buffer = Vec::new();
        write_str(&mut buffer, "AAPL").expect("write");

        assert_eq!(buffer, vec![4, 0, 0, 0, b'A', b'A', b'P', b'L']);
        assert_eq!(read_str(&mut buffer.as_slice()).expect("read"), "AAPL");
    }

    #[test]
    fn flags_other_than_zero_or_one_are_rejected() {
        let error = read_bool(&mut [2_u8].as_slice()).expect_err("flag 2 is invalid");
        assert!(matches!(error, CodecError::InvalidFlag { value: 2 }));
    }

    #[test]
    fn oversized_length_prefix_is_rejected_before_allocation() {
        let bytes = u32::MAX.to_le_bytes();
        let error = read_str(&mut bytes.as_slice()).expect_err("length is over the limit");
        assert!(matches!(error, CodecError::LengthTooLarge { what: "string", .. }));
    }

    #[test]
    fn dates_round_trip_through_day_numbers() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).expect("date");
        let mut buffer = Vec::new();
        write_date(&mut buffer, date).expect("write");

        assert_eq!(buffer.len(), 4);
        assert_eq!(read_date(&mut buffer.as_slice()).expect("read"), date);
    }

    #[test]
    fn truncated_input_surfaces_io_error() {
        let error = read_u64(&mut [1_u8, 2, 3].as_slice()).expect_err("short read");
        assert!(matches!(error, CodecError::Io(_)));
    }
}
