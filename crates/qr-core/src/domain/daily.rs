use std::collections::BTreeMap;
use std::io::{Read, Write};

use chrono::NaiveDate;

use crate::codec::{
    read_date, read_len, read_str, read_u8, write_date, write_len, write_str, write_u8, Decode,
    Encode,
};
use crate::domain::{compare, Company, Dividend, Equal, Quote, Serial, SerialKind, Split};
use crate::error::{CodecError, Mismatch};

/// Version byte written at the head of every exchange record.
pub const CURRENT_VERSION: u8 = 1;

/// One company's trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyDailyQuote {
    pub company: Company,
    pub dividend: Option<Dividend>,
    pub split: Option<Split>,
    pub pre: Serial,
    pub regular: Serial,
    pub post: Serial,
}

impl CompanyDailyQuote {
    pub fn new(company: Company) -> Self {
        Self {
            company,
            dividend: None,
            split: None,
            pre: Serial::new(),
            regular: Serial::new(),
            post: Serial::new(),
        }
    }

    /// True when no bars were captured in any session segment.
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.regular.is_empty() && self.post.is_empty()
    }

    pub fn serial(&self, kind: SerialKind) -> &Serial {
        match kind {
            SerialKind::Pre => &self.pre,
            SerialKind::Regular => &self.regular,
            SerialKind::Post => &self.post,
        }
    }

    pub fn serial_mut(&mut self, kind: SerialKind) -> &mut Serial {
        match kind {
            SerialKind::Pre => &mut self.pre,
            SerialKind::Regular => &mut self.regular,
            SerialKind::Post => &mut self.post,
        }
    }

    pub fn rollup(&self, kind: SerialKind) -> Quote {
        self.serial(kind).rollup()
    }

    pub fn bar_count(&self) -> usize {
        SerialKind::ALL
            .iter()
            .map(|kind| self.serial(*kind).len())
            .sum()
    }
}

impl Encode for CompanyDailyQuote {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        self.company.encode(writer)?;
        self.dividend.encode(writer)?;
        self.split.encode(writer)?;
        self.pre.encode(writer)?;
        self.regular.encode(writer)?;
        self.post.encode(writer)
    }
}

impl Decode for CompanyDailyQuote {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            company: Company::decode(reader)?,
            dividend: Option::decode(reader)?,
            split: Option::decode(reader)?,
            pre: Serial::decode(reader)?,
            regular: Serial::decode(reader)?,
            post: Serial::decode(reader)?,
        })
    }
}

impl Equal for CompanyDailyQuote {
    fn equal(&self, other: &Self) -> Result<(), Mismatch> {
        self.company
            .equal(&other.company)
            .map_err(|mismatch| mismatch.within("company"))?;
        self.dividend
            .equal(&other.dividend)
            .map_err(|mismatch| mismatch.within("dividend"))?;
        self.split
            .equal(&other.split)
            .map_err(|mismatch| mismatch.within("split"))?;
        for kind in SerialKind::ALL {
            self.serial(kind)
                .equal(other.serial(kind))
                .map_err(|mismatch| mismatch.within(kind.field_name()))?;
        }
        Ok(())
    }
}

/// Everything captured for one exchange on one calendar date.
///
/// `companies` lists every company considered that day. `quotes` only holds
/// companies whose day is non-empty, so an empty `quotes` map marks a
/// non-trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDailyQuote {
    pub version: u8,
    pub exchange: String,
    pub date: NaiveDate,
    pub companies: BTreeMap<String, Company>,
    pub quotes: BTreeMap<String, CompanyDailyQuote>,
}

impl ExchangeDailyQuote {
    pub fn new(exchange: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            version: CURRENT_VERSION,
            exchange: exchange.into(),
            date,
            companies: BTreeMap::new(),
            quotes: BTreeMap::new(),
        }
    }

    /// Record a considered company and, when it traded, its day.
    pub fn insert(&mut self, company: Company, quote: Option<CompanyDailyQuote>) {
        if let Some(quote) = quote.filter(|quote| !quote.is_empty()) {
            self.quotes.insert(company.code.clone(), quote);
        }
        self.companies.insert(company.code.clone(), company);
    }

    pub fn is_trading_day(&self) -> bool {
        !self.quotes.is_empty()
    }
}

impl Encode for ExchangeDailyQuote {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        write_u8(writer, self.version)?;
        write_str(writer, &self.exchange)?;
        write_date(writer, self.date)?;

        write_len(writer, "companies", self.companies.len())?;
        for company in self.companies.values() {
            company.encode(writer)?;
        }

        write_len(writer, "quotes", self.quotes.len())?;
        for quote in self.quotes.values() {
            quote.encode(writer)?;
        }
        Ok(())
    }
}

impl Decode for ExchangeDailyQuote {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        let version = read_u8(reader)?;
        if version != CURRENT_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                expected: CURRENT_VERSION,
            });
        }
        let mut record = Self::new(read_str(reader)?, read_date(reader)?);

        for _ in 0..read_len(reader, "companies")? {
            let company = Company::decode(reader)?;
            if record.companies.contains_key(&company.code) {
                return Err(CodecError::DuplicateKey {
                    what: "company",
                    key: company.code,
                });
            }
            record.companies.insert(company.code.clone(), company);
        }

        for _ in 0..read_len(reader, "quotes")? {
            let quote = CompanyDailyQuote::decode(reader)?;
            if record.quotes.contains_key(&quote.company.code) {
                return Err(CodecError::DuplicateKey {
                    what: "quote",
                    key: quote.company.code,
                });
            }
            record.quotes.insert(quote.company.code.clone(), quote);
        }

        Ok(record)
    }
}

impl Equal for ExchangeDailyQuote {
    fn equal(&self, other: &Self) -> Result<(), Mismatch> {
        compare("version", &self.version, &other.version)?;
        compare("exchange", &self.exchange, &other.exchange)?;
        compare("date", &self.date, &other.date)?;
        compare_maps("companies", &self.companies, &other.companies)?;
        compare_maps("quotes", &self.quotes, &other.quotes)
    }
}

fn compare_maps<V: Equal>(
    name: &str,
    left: &BTreeMap<String, V>,
    right: &BTreeMap<String, V>,
) -> Result<(), Mismatch> {
    for (key, value) in left {
        let segment = format!("{name}[{key}]");
        match right.get(key) {
            Some(other) => value
                .equal(other)
                .map_err(|mismatch| mismatch.within(&segment))?,
            None => return Err(Mismatch::new("present != absent").within(&segment)),
        }
    }
    if let Some(key) = right.keys().find(|key| !left.contains_key(*key)) {
        return Err(Mismatch::new("absent != present").within(&format!("{name}[{key}]")));
    }
    Ok(())
}
