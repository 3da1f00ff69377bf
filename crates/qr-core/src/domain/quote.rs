use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::codec::{read_f32, read_u64, write_f32, write_u64, Decode, Encode};
use crate::domain::{compare, compare_f32, Equal};
use crate::error::{CodecError, Mismatch};

/// One minute bar. `timestamp` is in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quote {
    pub timestamp: u64,
    pub open: f32,
    pub close: f32,
    pub high: f32,
    pub low: f32,
    pub volume: u64,
}

impl Quote {
    /// All-zero bars are placeholders some sources emit for minutes without trades.
    pub fn is_blank(&self) -> bool {
        self.open == 0.0 && self.close == 0.0 && self.high == 0.0 && self.low == 0.0 && self.volume == 0
    }
}

impl Encode for Quote {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        write_u64(writer, self.timestamp)?;
        write_f32(writer, self.open)?;
        write_f32(writer, self.close)?;
        write_f32(writer, self.high)?;
        write_f32(writer, self.low)?;
        write_u64(writer, self.volume)
    }
}

impl Decode for Quote {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            timestamp: read_u64(reader)?,
            open: read_f32(reader)?,
            close: read_f32(reader)?,
            high: read_f32(reader)?,
            low: read_f32(reader)?,
            volume: read_u64(reader)?,
        })
    }
}

impl Equal for Quote {
    fn equal(&self, other: &Self) -> Result<(), Mismatch> {
        compare("timestamp", &self.timestamp, &other.timestamp)?;
        compare_f32("open", self.open, other.open)?;
        compare_f32("close", self.close, other.close)?;
        compare_f32("high", self.high, other.high)?;
        compare_f32("low", self.low, other.low)?;
        compare("volume", &self.volume, &other.volume)
    }
}
