//! # Quote Recorder Core
//!
//! Record model, persistence contract, and crawl scheduling for the quote
//! recorder: a daemon that captures one intraday record per exchange per
//! local calendar day and keeps the history gap-free.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Yahoo chart source and the company roster |
//! | [`calendar`] | Exchange registry, local day arithmetic, clocks |
//! | [`codec`] | Deterministic binary encoding primitives |
//! | [`domain`] | Quote, Serial, CompanyDailyQuote, ExchangeDailyQuote |
//! | [`error`] | Codec, validation, and read-back mismatch errors |
//! | [`http_client`] | HTTP client abstraction |
//! | [`notifier`] | Job outcome reporting |
//! | [`retry`] | Whole-batch retry policy |
//! | [`scheduler`] | History backfill and daily capture jobs |
//! | [`source`] | Upstream data source contracts |
//! | [`store`] | Backend-agnostic store contract |
//! | [`throttling`] | Request rate limiting |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  qr run         │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Scheduler      │────▶│ Notifier         │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!    ┌─────┴──────────────┐
//!    ▼                    ▼
//! ┌─────────────────┐  ┌──────────────────┐
//! │ Source (Yahoo)  │  │ Store backend    │
//! └─────────────────┘  └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Source failures carry a kind that separates "no data" from transient trouble:
//!
//! ```rust
//! use qr_core::{SourceError, SourceErrorKind};
//!
//! fn is_worth_retrying(error: &SourceError) -> bool {
//!     match error.kind() {
//!         SourceErrorKind::NotFound => false,
//!         _ => error.retryable(),
//!     }
//! }
//!
//! assert!(!is_worth_retrying(&SourceError::not_found("delisted")));
//! ```

pub mod adapters;
pub mod calendar;
pub mod codec;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod notifier;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod throttling;

// Adapter implementations
pub use adapters::{Roster, RosterError, YahooSource, YAHOO_CHART_BASE_URL};

// Calendar
pub use calendar::{date_range, parse_date, Clock, Exchange, FixedClock, SystemClock};

// Codec
pub use codec::{Decode, Encode};

// Domain models
pub use domain::{
    Company, CompanyDailyQuote, Dividend, Equal, ExchangeDailyQuote, Quote, Serial, SerialKind,
    Split, CURRENT_VERSION,
};

// Error types
pub use error::{CodecError, Mismatch, ValidationError};

// HTTP client types
pub use http_client::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};

// Notification
pub use notifier::{JobKind, JobOutcome, LogNotifier, MultiNotifier, Notifier, WebhookNotifier};

// Retry logic
pub use retry::{Backoff, RetryPolicy};

// Scheduling
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError};

// Sources
pub use source::{ReadyFuture, Source, SourceError, SourceErrorKind, SplitDividendSource};

// Store contract
pub use store::{ReadInterceptor, Store, StoreError};

// Throttling
pub use throttling::Throttle;
