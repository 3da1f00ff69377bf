//! Per-exchange history backfill and daily capture.
//!
//! For every configured exchange two independent jobs share one [`Store`] and
//! one [`Source`]:
//!
//! | Job | Behavior |
//! |-----|----------|
//! | history | crawl every date from the start date through yesterday that the store lacks; any failure is fatal |
//! | daily | sleep until local midnight, crawl yesterday with whole-batch retry, notify, repeat |
//!
//! Dates run strictly one after another. Companies within a date run
//! concurrently, bounded by [`SchedulerConfig::parallel`].

mod crawl;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::calendar::{date_range, Clock, Exchange, SystemClock};
use crate::notifier::{JobKind, JobOutcome, Notifier};
use crate::retry::RetryPolicy;
use crate::source::{Source, SourceError, SplitDividendSource};
use crate::store::{Store, StoreError};

/// Default number of companies crawled at once for one date.
pub const DEFAULT_PARALLEL: usize = 32;
/// Default upper bound for a single company crawl.
pub const DEFAULT_CRAWL_TIMEOUT: Duration = Duration::from_secs(60);

/// Wake-ups that land a hair before midnight still belong to the new day.
const MIDNIGHT_SLACK: TimeDelta = TimeDelta::seconds(5);

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum concurrent per-company crawls for one date.
    pub parallel: usize,
    /// Whole-batch retry policy used by the daily job.
    pub retry: RetryPolicy,
    pub crawl_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLEL,
            retry: RetryPolicy::default(),
            crawl_timeout: DEFAULT_CRAWL_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to fetch the {exchange} roster: {source}")]
    Roster {
        exchange: String,
        source: SourceError,
    },

    #[error("failed to save {exchange} {date}: {source}")]
    Save {
        exchange: String,
        date: NaiveDate,
        source: StoreError,
    },

    #[error("all {companies} {exchange} companies failed to crawl for {date}")]
    NoCompanyCrawled {
        exchange: String,
        date: NaiveDate,
        companies: usize,
    },

    #[error("{exchange} background task failed: {message}")]
    Task { exchange: String, message: String },

    #[error("{exchange} crawl failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        exchange: String,
        attempts: u32,
        #[source]
        source: Box<SchedulerError>,
    },

    #[error(
        "history job for {exchange} failed with {} date(s) still missing [{}]: {source}",
        .missing.len(),
        join_dates(.missing)
    )]
    HistoryFailed {
        exchange: String,
        missing: Vec<NaiveDate>,
        #[source]
        source: Box<SchedulerError>,
    },
}

impl SchedulerError {
    /// Date the batch stopped at, when the failure is tied to one date.
    pub fn failed_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Save { date, .. } | Self::NoCompanyCrawled { date, .. } => Some(*date),
            Self::RetriesExhausted { source, .. } | Self::HistoryFailed { source, .. } => {
                source.failed_date()
            }
            Self::Roster { .. } | Self::Task { .. } => None,
        }
    }
}

/// Time until the first midnight that yields a new capture date.
///
/// A cycle that woke inside the slack and finished before midnight has
/// already captured the day that midnight would name.
fn wait_after_capture(exchange: &Exchange, now: DateTime<Utc>) -> Duration {
    (exchange.next_midnight(now + MIDNIGHT_SLACK) - now)
        .to_std()
        .unwrap_or_default()
}

fn join_dates(dates: &[NaiveDate]) -> String {
    dates
        .iter()
        .map(NaiveDate::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drives crawl-and-save for a set of exchanges with injected collaborators.
pub struct Scheduler {
    store: Arc<dyn Store>,
    source: Arc<dyn Source>,
    notifier: Arc<dyn Notifier>,
    split_dividend: Option<Arc<dyn SplitDividendSource>>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn Source>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            split_dividend: None,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Override dividend and split values with a supplemental lookup.
    pub fn with_split_dividend_source(mut self, source: Arc<dyn SplitDividendSource>) -> Self {
        self.split_dividend = Some(source);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start the history and daily jobs of every exchange.
    ///
    /// Daily jobs never finish, so this only returns when a history job fails
    /// or a job task panics.
    pub async fn run(
        self: Arc<Self>,
        exchanges: Vec<Exchange>,
        start: NaiveDate,
    ) -> Result<(), SchedulerError> {
        let mut jobs = JoinSet::new();
        for exchange in exchanges {
            let scheduler = Arc::clone(&self);
            let history_exchange = exchange.clone();
            jobs.spawn(async move {
                let code = history_exchange.code().to_owned();
                let result = scheduler
                    .history_job(&history_exchange, start)
                    .await
                    .map(|_| ());
                (code, result)
            });

            let scheduler = Arc::clone(&self);
            jobs.spawn(async move {
                scheduler.daily_job(&exchange).await;
                (exchange.code().to_owned(), Ok(()))
            });
        }

        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((exchange, Err(error))) => {
                    error!(exchange = %exchange, %error, "job failed, stopping scheduler");
                    jobs.abort_all();
                    return Err(error);
                }
                Err(join_error) => {
                    jobs.abort_all();
                    return Err(SchedulerError::Task {
                        exchange: String::from("*"),
                        message: join_error.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Dates in `[start, end]` the store does not hold yet.
    ///
    /// A failed probe counts as missing: re-crawling a stored date is an
    /// idempotent overwrite, silently skipping it is not.
    pub async fn missing_dates(
        &self,
        exchange: &Exchange,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, SchedulerError> {
        let store = Arc::clone(&self.store);
        let code = exchange.code().to_owned();
        let dates = date_range(start, end);

        let probes = tokio::task::spawn_blocking(move || {
            dates
                .into_iter()
                .map(|date| (date, store.exists(&code, date)))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|join_error| SchedulerError::Task {
            exchange: exchange.code().to_owned(),
            message: join_error.to_string(),
        })?;

        let mut missing = Vec::new();
        for (date, probe) in probes {
            match probe {
                Ok(true) => {}
                Ok(false) => missing.push(date),
                Err(error) => {
                    warn!(exchange = %exchange, %date, %error, "existence probe failed, treating date as missing");
                    missing.push(date);
                }
            }
        }
        Ok(missing)
    }

    /// Backfill every missing date from `start` through yesterday.
    ///
    /// Returns the dates that were crawled.
    pub async fn history_job(
        &self,
        exchange: &Exchange,
        start: NaiveDate,
    ) -> Result<Vec<NaiveDate>, SchedulerError> {
        let end = exchange.yesterday(self.clock.now());
        let missing = self.missing_dates(exchange, start, end).await?;
        if missing.is_empty() {
            info!(exchange = %exchange, %start, %end, "history is complete");
            return Ok(missing);
        }

        info!(exchange = %exchange, count = missing.len(), "backfilling missing dates");
        match self.crawl(exchange, &missing).await {
            Ok(()) => {
                info!(exchange = %exchange, count = missing.len(), "history backfill finished");
                Ok(missing)
            }
            Err(error) => {
                let still_missing: Vec<NaiveDate> = match error.failed_date() {
                    Some(failed) => missing.iter().copied().filter(|date| *date >= failed).collect(),
                    None => missing.clone(),
                };
                let outcome = JobOutcome::failed(
                    exchange.code(),
                    still_missing.first().copied().unwrap_or(end),
                    JobKind::History,
                    error.to_string(),
                );
                self.notifier.notify(&outcome).await;
                Err(SchedulerError::HistoryFailed {
                    exchange: exchange.code().to_owned(),
                    missing: still_missing,
                    source: Box::new(error),
                })
            }
        }
    }

    /// Capture yesterday after every local midnight. Never returns.
    pub async fn daily_job(&self, exchange: &Exchange) {
        let mut wait = exchange.until_next_midnight(self.clock.now());
        loop {
            info!(exchange = %exchange, wait_secs = wait.as_secs(), "daily job waiting for local midnight");
            tokio::time::sleep(wait).await;

            let date = exchange.yesterday(self.clock.now() + MIDNIGHT_SLACK);
            // failures are already reported by the cycle; the loop keeps its schedule
            let _ = self.daily_cycle(exchange, date).await;

            wait = wait_after_capture(exchange, self.clock.now());
        }
    }

    /// One daily capture of `date` with retry, reported through the notifier.
    ///
    /// Returns the number of attempts the successful crawl took.
    pub async fn daily_cycle(
        &self,
        exchange: &Exchange,
        date: NaiveDate,
    ) -> Result<u32, SchedulerError> {
        let result = self.crawl_with_retry(exchange, &[date]).await;
        let outcome = match &result {
            Ok(attempts) => {
                info!(exchange = %exchange, %date, attempts, "daily capture succeeded");
                JobOutcome::succeeded(exchange.code(), date, JobKind::Daily)
            }
            Err(error) => {
                error!(exchange = %exchange, %date, %error, "daily capture failed");
                JobOutcome::failed(exchange.code(), date, JobKind::Daily, error.to_string())
            }
        };
        self.notifier.notify(&outcome).await;
        result
    }

    /// Run the bulk crawl, retrying the entire batch on failure.
    pub async fn crawl_with_retry(
        &self,
        exchange: &Exchange,
        dates: &[NaiveDate],
    ) -> Result<u32, SchedulerError> {
        let max_attempts = self.config.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.crawl(exchange, dates).await {
                Ok(()) => return Ok(attempt),
                Err(error) if attempt < max_attempts => {
                    let delay = self.config.retry.delay_for_attempt(attempt - 1);
                    warn!(
                        exchange = %exchange,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "crawl batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(SchedulerError::RetriesExhausted {
                        exchange: exchange.code().to_owned(),
                        attempts: attempt,
                        source: Box::new(error),
                    })
                }
            }
        }
    }
}
