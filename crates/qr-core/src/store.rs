//! Backend-agnostic persistence contract.
//!
//! Every backend's `save` follows the same protocol: write the record in the
//! backend's native unit, read it back through the path `load` uses, compare the
//! two with [`Equal`], and undo the write when they differ. A successful `save`
//! therefore guarantees that an immediate `load` returns an equal record.

use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Equal, ExchangeDailyQuote};
use crate::error::{validate_key_component, CodecError, Mismatch, ValidationError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record for {exchange} on {date}")]
    NotFound { exchange: String, date: NaiveDate },

    /// Read-back differed from the written record; the write was undone.
    #[error("read-back validation failed: {0}")]
    Validation(#[from] Mismatch),

    #[error("record for {actual_exchange} on {actual_date} cannot be saved under {exchange} on {date}")]
    KeyMismatch {
        exchange: String,
        date: NaiveDate,
        actual_exchange: String,
        actual_date: NaiveDate,
    },

    #[error(transparent)]
    InvalidKey(#[from] ValidationError),

    #[error("invalid store descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Persistence of one [`ExchangeDailyQuote`] per exchange and date.
///
/// Implementations are shared across every exchange's jobs and must tolerate
/// concurrent calls.
pub trait Store: Send + Sync {
    /// Cheap existence probe that does not decode the record.
    fn exists(&self, exchange: &str, date: NaiveDate) -> Result<bool, StoreError>;

    /// Write, read back, compare, and roll back on mismatch.
    fn save(
        &self,
        exchange: &str,
        date: NaiveDate,
        record: &ExchangeDailyQuote,
    ) -> Result<(), StoreError>;

    fn load(&self, exchange: &str, date: NaiveDate) -> Result<ExchangeDailyQuote, StoreError>;

    fn close(&self) -> Result<(), StoreError>;
}

/// Hook applied to every read-back value before validation.
///
/// Lets tests simulate a backend that returns something other than what was written.
pub type ReadInterceptor = Arc<dyn Fn(&mut ExchangeDailyQuote) + Send + Sync>;

/// Check the arguments of a `save` call before anything is written.
pub fn check_save_request(
    exchange: &str,
    date: NaiveDate,
    record: &ExchangeDailyQuote,
) -> Result<(), StoreError> {
    validate_key_component("exchange code", exchange)?;
    if record.exchange != exchange || record.date != date {
        return Err(StoreError::KeyMismatch {
            exchange: exchange.to_owned(),
            date,
            actual_exchange: record.exchange.clone(),
            actual_date: record.date,
        });
    }
    for code in record.companies.keys().chain(record.quotes.keys()) {
        validate_key_component("company code", code)?;
    }
    Ok(())
}

/// Compare the written record with what the backend returned.
pub fn verify_read_back(
    written: &ExchangeDailyQuote,
    read_back: &ExchangeDailyQuote,
) -> Result<(), StoreError> {
    written.equal(read_back).map_err(StoreError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Company;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).expect("date")
    }

    #[test]
    fn save_request_must_match_the_record_key() {
        let record = ExchangeDailyQuote::new("Nasdaq", date());

        assert!(check_save_request("Nasdaq", date(), &record).is_ok());
        assert!(matches!(
            check_save_request("Nyse", date(), &record),
            Err(StoreError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn company_codes_with_separators_are_refused() {
        let mut record = ExchangeDailyQuote::new("Nasdaq", date());
        record.insert(Company::new("BAD:CODE", "Broken"), None);

        assert!(matches!(
            check_save_request("Nasdaq", date(), &record),
            Err(StoreError::InvalidKey(ValidationError::ReservedCharacter { .. }))
        ));
    }

    #[test]
    fn read_back_difference_is_a_validation_error() {
        let written = ExchangeDailyQuote::new("Nasdaq", date());
        let mut read_back = written.clone();
        read_back.exchange = String::from("Nyse");

        let error = verify_read_back(&written, &read_back).expect_err("exchange differs");
        assert!(error.is_validation());
    }
}
