//! Corporate actions. Absence is modelled as `Option::None`, which encodes as a
//! single `0` flag byte with no payload.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::codec::{read_f32, read_u64, write_f32, write_u64, Decode, Encode};
use crate::domain::{compare, compare_f32, Equal};
use crate::error::{CodecError, Mismatch};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dividend {
    pub timestamp: u64,
    pub amount: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Split {
    pub timestamp: u64,
    pub numerator: f32,
    pub denominator: f32,
}

impl Encode for Dividend {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        write_u64(writer, self.timestamp)?;
        write_f32(writer, self.amount)
    }
}

impl Decode for Dividend {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            timestamp: read_u64(reader)?,
            amount: read_f32(reader)?,
        })
    }
}

impl Equal for Dividend {
    fn equal(&self, other: &Self) -> Result<(), Mismatch> {
        compare("timestamp", &self.timestamp, &other.timestamp)?;
        compare_f32("amount", self.amount, other.amount)
    }
}

impl Encode for Split {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        write_u64(writer, self.timestamp)?;
        write_f32(writer, self.numerator)?;
        write_f32(writer, self.denominator)
    }
}

impl Decode for Split {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            timestamp: read_u64(reader)?,
            numerator: read_f32(reader)?,
            denominator: read_f32(reader)?,
        })
    }
}

impl Equal for Split {
    fn equal(&self, other: &Self) -> Result<(), Mismatch> {
        compare("timestamp", &self.timestamp, &other.timestamp)?;
        compare_f32("numerator", self.numerator, other.numerator)?;
        compare_f32("denominator", self.denominator, other.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_event_is_a_single_flag_byte() {
        let none: Option<Dividend> = None;
        assert_eq!(none.to_bytes().expect("encode"), vec![0]);

        let split = Some(Split {
            timestamp: 1_700_000_000,
            numerator: 4.0,
            denominator: 1.0,
        });
        let bytes = split.to_bytes().expect("encode");
        assert_eq!(bytes.len(), 1 + 8 + 4 + 4);
        assert_eq!(bytes[0], 1);
    }

    #[test]
    fn decoder_skips_payload_of_disabled_section() {
        // disabled dividend followed directly by an enabled split
        let mut bytes = None::<Dividend>.to_bytes().expect("encode");
        let split = Split {
            timestamp: 42,
            numerator: 2.0,
            denominator: 1.0,
        };
        bytes.extend(Some(split).to_bytes().expect("encode"));

        let mut cursor = bytes.as_slice();
        let dividend = Option::<Dividend>::decode(&mut cursor).expect("dividend");
        let decoded = Option::<Split>::decode(&mut cursor).expect("split");

        assert_eq!(dividend, None);
        assert_eq!(decoded, Some(split));
        assert!(cursor.is_empty());
    }
}
