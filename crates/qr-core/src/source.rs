//! Quote source contracts consumed by the scheduler.
//!
//! A source distinguishes two failure classes:
//!
//! - **permanent not-found**: the source confirms it has no data for a symbol
//!   and date. `crawl` reports this as `Ok(None)` and the scheduler never retries it.
//! - **transient**: network, throttling, timeout, or parse failures, returned
//!   as [`SourceError`]. The failing company is left out of that day's record.
//!   Only when every company of a non-empty roster fails does the day fail, and
//!   with it the batch that the daily job retries.
//!
//! Request pacing lives in [`Source::ready`], which callers await before each
//! call so the wait for a request slot never eats into a call's timeout.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use chrono::NaiveDate;

use crate::calendar::Exchange;
use crate::domain::{Company, CompanyDailyQuote, Dividend, Split};

/// Boxed future returned by source calls.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Resolves once the source accepts another request.
pub type ReadyFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Stable source error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// The source has no data for the symbol and date. Never retried.
    NotFound,
    Unavailable,
    RateLimited,
    InvalidResponse,
    Timeout,
}

/// Structured source error carrying its retry classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidResponse,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn is_permanent_not_found(&self) -> bool {
        matches!(self.kind, SourceErrorKind::NotFound)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
            SourceErrorKind::Timeout => "source.timeout",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Company discovery and per-company daily crawl.
pub trait Source: Send + Sync {
    /// Authoritative roster for the exchange. An empty roster is not an error.
    fn companies<'a>(&'a self, exchange: &'a Exchange) -> SourceFuture<'a, Vec<Company>>;

    /// One company's day, or `None` when the source confirms there is no data.
    fn crawl<'a>(
        &'a self,
        exchange: &'a Exchange,
        company: &'a Company,
        date: NaiveDate,
    ) -> SourceFuture<'a, Option<CompanyDailyQuote>>;

    /// Wait for a request slot. Unthrottled sources are always ready.
    fn ready(&self) -> ReadyFuture<'_> {
        Box::pin(async {})
    }
}

/// Supplemental corporate-action lookup for markets where the primary source
/// misreports dividends or splits.
pub trait SplitDividendSource: Send + Sync {
    fn query_split_and_dividend<'a>(
        &'a self,
        exchange: &'a Exchange,
        company: &'a Company,
        date: NaiveDate,
    ) -> SourceFuture<'a, (Option<Dividend>, Option<Split>)>;

    /// Wait for a request slot. Unthrottled sources are always ready.
    fn ready(&self) -> ReadyFuture<'_> {
        Box::pin(async {})
    }
}
