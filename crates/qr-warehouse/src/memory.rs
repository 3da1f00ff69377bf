//! Ordered in-memory key-value backend.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::NaiveDate;
use qr_core::codec::{Decode, Encode};
use qr_core::domain::{Company, CompanyDailyQuote, ExchangeDailyQuote, CURRENT_VERSION};
use qr_core::error::{validate_key_component, CodecError};
use qr_core::store::{check_save_request, verify_read_back, ReadInterceptor, Store, StoreError};
use tracing::{debug, warn};

use crate::keys::{company_key, day_prefix, header_key, parse_entry, quote_key, EntryKind};

type Entries = BTreeMap<String, Vec<u8>>;

/// Every entry of one day, header first.
type DaySnapshot = Vec<(String, Vec<u8>)>;

/// Process-local store over a sorted map, one entry per company per day.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<Entries>,
    read_interceptor: Option<ReadInterceptor>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_interceptor(mut self, interceptor: ReadInterceptor) -> Self {
        self.read_interceptor = Some(interceptor);
        self
    }

    /// Number of raw entries, headers included.
    pub fn entry_count(&self) -> usize {
        self.entries
            .read()
            .expect("memory store lock poisoned")
            .len()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn read_day(&self, exchange: &str, date: NaiveDate) -> Result<ExchangeDailyQuote, StoreError> {
        let entries = self.entries.read().expect("memory store lock poisoned");
        let record = decode_day(&entries, exchange, date)?;
        drop(entries);
        Ok(self.intercept(record))
    }

    fn intercept(&self, mut record: ExchangeDailyQuote) -> ExchangeDailyQuote {
        if let Some(interceptor) = &self.read_interceptor {
            interceptor(&mut record);
        }
        record
    }

    /// Swap a day's entries for `replacement` under one write lock, so readers
    /// and concurrent saves see either the old day or the new one.
    fn replace_day(&self, exchange: &str, date: NaiveDate, replacement: DaySnapshot) {
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        let prefix = day_prefix(exchange, date);
        let stale: Vec<String> = day_range(&entries, &prefix)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.remove(&key);
        }
        entries.remove(&header_key(exchange, date));
        entries.extend(replacement);
    }
}

fn day_range<'a>(
    entries: &'a Entries,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a String, &'a Vec<u8>)> + 'a {
    entries
        .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(move |(key, _)| key.starts_with(prefix))
}

/// Rebuild one day from `entries`, which may be the live map or a staged copy.
fn decode_day(
    entries: &Entries,
    exchange: &str,
    date: NaiveDate,
) -> Result<ExchangeDailyQuote, StoreError> {
    let Some(header) = entries.get(&header_key(exchange, date)) else {
        return Err(StoreError::NotFound {
            exchange: exchange.to_owned(),
            date,
        });
    };
    let version = header.first().copied().unwrap_or_default();
    if version != CURRENT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: version,
            expected: CURRENT_VERSION,
        }
        .into());
    }

    let mut record = ExchangeDailyQuote::new(exchange, date);
    record.version = version;

    let prefix = day_prefix(exchange, date);
    for (key, value) in day_range(entries, &prefix) {
        let Some((kind, code)) = key.strip_prefix(&prefix).and_then(parse_entry) else {
            return Err(StoreError::Backend(format!("unrecognized key '{key}'")));
        };
        match kind {
            EntryKind::Company => {
                record
                    .companies
                    .insert(code.to_owned(), Company::from_bytes(value)?);
            }
            EntryKind::Quote => {
                record
                    .quotes
                    .insert(code.to_owned(), CompanyDailyQuote::from_bytes(value)?);
            }
        }
    }
    Ok(record)
}

fn encode_day(record: &ExchangeDailyQuote) -> Result<DaySnapshot, StoreError> {
    let exchange = record.exchange.as_str();
    let date = record.date;
    let mut day = Vec::with_capacity(1 + record.companies.len() + record.quotes.len());
    day.push((header_key(exchange, date), vec![record.version]));
    for (code, company) in &record.companies {
        day.push((company_key(exchange, date, code), company.to_bytes()?));
    }
    for (code, quote) in &record.quotes {
        day.push((quote_key(exchange, date, code), quote.to_bytes()?));
    }
    Ok(day)
}

impl Store for MemoryStore {
    fn exists(&self, exchange: &str, date: NaiveDate) -> Result<bool, StoreError> {
        self.ensure_open()?;
        validate_key_component("exchange code", exchange)?;
        let entries = self.entries.read().expect("memory store lock poisoned");
        Ok(entries.contains_key(&header_key(exchange, date)))
    }

    fn save(
        &self,
        exchange: &str,
        date: NaiveDate,
        record: &ExchangeDailyQuote,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        check_save_request(exchange, date, record)?;
        let day = encode_day(record)?;

        let staged: Entries = day.iter().cloned().collect();
        let verified = decode_day(&staged, exchange, date)
            .map(|read_back| self.intercept(read_back))
            .and_then(|read_back| verify_read_back(record, &read_back));
        if let Err(error) = verified {
            warn!(exchange, %date, %error, "read-back of staged entries failed, keeping the stored day");
            return Err(error);
        }

        self.replace_day(exchange, date, day);

        debug!(exchange, %date, quotes = record.quotes.len(), "saved to memory store");
        Ok(())
    }

    fn load(&self, exchange: &str, date: NaiveDate) -> Result<ExchangeDailyQuote, StoreError> {
        self.ensure_open()?;
        validate_key_component("exchange code", exchange)?;
        self.read_day(exchange, date)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
