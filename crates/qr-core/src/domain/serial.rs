use std::fmt::{Display, Formatter};
use std::io::{Read, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::{read_seq, write_len, Decode, Encode};
use crate::domain::{compare, Equal, Quote};
use crate::error::{CodecError, Mismatch};

/// Session segment a serial covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SerialKind {
    Pre,
    Regular,
    Post,
}

impl SerialKind {
    pub const ALL: [Self; 3] = [Self::Pre, Self::Regular, Self::Post];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "Pre",
            Self::Regular => "Regular",
            Self::Post => "Post",
        }
    }

    pub(crate) const fn field_name(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Regular => "regular",
            Self::Post => "post",
        }
    }
}

impl Display for SerialKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerialKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pre" => Ok(Self::Pre),
            "regular" => Ok(Self::Regular),
            "post" => Ok(Self::Post),
            other => Err(format!("unknown serial kind '{other}'")),
        }
    }
}

/// Ordered minute bars. Insertion order is discovery order until sorted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(Vec<Quote>);

impl Serial {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, quote: Quote) {
        self.0.push(quote);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Quote> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Quote] {
        &self.0
    }

    pub fn sort_by_timestamp(&mut self) {
        self.0.sort_by_key(|quote| quote.timestamp);
    }

    /// Reduce the serial to one summary bar. An empty serial rolls up to a zero quote.
    pub fn rollup(&self) -> Quote {
        let (Some(first), Some(last)) = (self.0.first(), self.0.last()) else {
            return Quote::default();
        };

        self.0.iter().fold(
            Quote {
                timestamp: first.timestamp,
                open: first.open,
                close: last.close,
                high: first.high,
                low: first.low,
                volume: 0,
            },
            |mut summary, quote| {
                summary.high = summary.high.max(quote.high);
                summary.low = summary.low.min(quote.low);
                summary.volume = summary.volume.saturating_add(quote.volume);
                summary
            },
        )
    }
}

impl From<Vec<Quote>> for Serial {
    fn from(quotes: Vec<Quote>) -> Self {
        Self(quotes)
    }
}

impl FromIterator<Quote> for Serial {
    fn from_iter<I: IntoIterator<Item = Quote>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Serial {
    type Item = &'a Quote;
    type IntoIter = std::slice::Iter<'a, Quote>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Encode for Serial {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        write_len(writer, "serial", self.0.len())?;
        for quote in &self.0 {
            quote.encode(writer)?;
        }
        Ok(())
    }
}

impl Decode for Serial {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        read_seq(reader, "serial").map(Self)
    }
}

impl Equal for Serial {
    fn equal(&self, other: &Self) -> Result<(), Mismatch> {
        compare("len", &self.0.len(), &other.0.len())?;
        for (index, (left, right)) in self.0.iter().zip(&other.0).enumerate() {
            left.equal(right)
                .map_err(|mismatch| mismatch.within(&format!("[{index}]")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(timestamp: u64, open: f32, close: f32, high: f32, low: f32, volume: u64) -> Quote {
        Quote {
            timestamp,
            open,
            close,
            high,
            low,
            volume,
        }
    }

    #[test]
    fn rollup_takes_first_open_last_close_extremes_and_volume_sum() {
        let serial = Serial::from(vec![
            bar(1_000, 10.0, 12.0, 15.0, 9.0, 100),
            bar(1_060, 12.0, 11.0, 13.0, 10.0, 50),
        ]);

        assert_eq!(serial.rollup(), bar(1_000, 10.0, 11.0, 15.0, 9.0, 150));
    }

    #[test]
    fn rollup_of_empty_serial_is_zero_quote() {
        assert_eq!(Serial::new().rollup(), Quote::default());
    }

    #[test]
    fn sort_orders_by_timestamp_keeping_ties_stable() {
        let mut serial = Serial::from(vec![
            bar(120, 3.0, 3.0, 3.0, 3.0, 3),
            bar(60, 1.0, 1.0, 1.0, 1.0, 1),
            bar(120, 4.0, 4.0, 4.0, 4.0, 4),
        ]);
        serial.sort_by_timestamp();

        let volumes: Vec<u64> = serial.iter().map(|quote| quote.volume).collect();
        assert_eq!(volumes, vec![1, 3, 4]);
    }

    #[test]
    fn equal_reports_length_before_elements() {
        let left = Serial::from(vec![bar(60, 1.0, 1.0, 1.0, 1.0, 1)]);
        let right = Serial::new();

        let mismatch = left.equal(&right).expect_err("lengths differ");
        assert_eq!(mismatch.path(), "len");
    }

    #[test]
    fn kind_names_parse_case_insensitively() {
        assert_eq!("regular".parse::<SerialKind>(), Ok(SerialKind::Regular));
        assert_eq!(SerialKind::Post.to_string(), "Post");
        assert!("after-hours".parse::<SerialKind>().is_err());
    }
}
