//! Key layout shared by ordered key-value backends.
//!
//! | Key | Value |
//! |-----|-------|
//! | `{exchange}:{yyyymmdd}` | day header: the record version byte |
//! | `{exchange}:{yyyymmdd}:c:{code}` | encoded `Company` |
//! | `{exchange}:{yyyymmdd}:q:{code}` | encoded `CompanyDailyQuote` |
//!
//! Codes never contain `:`, so a day's entries are exactly the keys that start
//! with [`day_prefix`].

use chrono::NaiveDate;
use qr_core::calendar::compact_date;

const COMPANY_TAG: &str = "c";
const QUOTE_TAG: &str = "q";

pub fn header_key(exchange: &str, date: NaiveDate) -> String {
    format!("{exchange}:{}", compact_date(date))
}

/// Prefix of every per-company entry of one day.
pub fn day_prefix(exchange: &str, date: NaiveDate) -> String {
    format!("{}:", header_key(exchange, date))
}

pub fn company_key(exchange: &str, date: NaiveDate, code: &str) -> String {
    format!("{}{COMPANY_TAG}:{code}", day_prefix(exchange, date))
}

pub fn quote_key(exchange: &str, date: NaiveDate, code: &str) -> String {
    format!("{}{QUOTE_TAG}:{code}", day_prefix(exchange, date))
}

/// What a per-company key under a day prefix refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Company,
    Quote,
}

/// Split the part of a key after [`day_prefix`] into its kind and company code.
pub fn parse_entry(suffix: &str) -> Option<(EntryKind, &str)> {
    let (tag, code) = suffix.split_once(':')?;
    let kind = match tag {
        COMPANY_TAG => EntryKind::Company,
        QUOTE_TAG => EntryKind::Quote,
        _ => return None,
    };
    Some((kind, code))
}
