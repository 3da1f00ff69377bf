//! TOML configuration with environment overrides.
//!
//! ```toml
//! exchanges = ["Nasdaq", "Hkex"]
//! store = "duckdb|/var/lib/qr/quotes.duckdb"
//! start = "2024-01-02"          # or: last_days = 20
//! parallel = 32
//! retry_count = 10
//! retry_interval_secs = 30
//! retry_backoff = "fixed"      # or "exponential", doubling up to retry_max_interval_secs
//! retry_max_interval_secs = 600
//! crawl_timeout_secs = 60
//! roster = "/etc/qr/roster.json"
//!
//! [yahoo]
//! requests_per_minute = 600
//! split_dividend_lookup = false
//!
//! [notifier]
//! webhook_url = "https://hooks.example.com/qr"
//! ```
//!
//! `QR_STORE` replaces `store` and `QR_WEBHOOK_TOKEN` replaces
//! `notifier.bearer_token`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Days, NaiveDate};
use qr_core::adapters::YAHOO_CHART_BASE_URL;
use qr_core::calendar::{parse_date, Exchange};
use qr_core::error::ValidationError;
use qr_core::retry::RetryPolicy;
use qr_core::scheduler::SchedulerConfig;
use serde::Deserialize;
use thiserror::Error;

pub const STORE_ENV: &str = "QR_STORE";
pub const WEBHOOK_TOKEN_ENV: &str = "QR_WEBHOOK_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Spacing between whole-batch retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct YahooConfig {
    pub base_url: String,
    pub requests_per_minute: u32,
    /// Re-query dividends and splits from the daily chart for every crawled company.
    pub split_dividend_lookup: bool,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            base_url: YAHOO_CHART_BASE_URL.to_owned(),
            requests_per_minute: 600,
            split_dividend_lookup: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub exchanges: Vec<String>,
    /// Store descriptor, e.g. `fs|/var/lib/qr`.
    pub store: String,
    /// First backfill date; wins over `last_days` when set.
    pub start: Option<String>,
    pub last_days: u32,
    pub parallel: usize,
    pub retry_count: u32,
    /// First retry delay; the only delay when `retry_backoff` is fixed.
    pub retry_interval_secs: u64,
    pub retry_backoff: RetryBackoff,
    /// Ceiling for exponential retry delays.
    pub retry_max_interval_secs: u64,
    pub crawl_timeout_secs: u64,
    /// JSON roster mapping exchange code to its companies.
    pub roster: Option<PathBuf>,
    pub yahoo: YahooConfig,
    pub notifier: NotifierConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchanges: Vec::new(),
            store: String::from("fs|data"),
            start: None,
            last_days: 20,
            parallel: 32,
            retry_count: 10,
            retry_interval_secs: 30,
            retry_backoff: RetryBackoff::Fixed,
            retry_max_interval_secs: 600,
            crawl_timeout_secs: 60,
            roster: None,
            yahoo: YahooConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl Config {
    /// Read the file, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(store) = lookup(STORE_ENV) {
            self.store = store;
        }
        if let Some(token) = lookup(WEBHOOK_TOKEN_ENV) {
            self.notifier.bearer_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.trim().is_empty() {
            return Err(invalid("store", "descriptor must not be empty"));
        }
        if self.parallel == 0 {
            return Err(invalid("parallel", "must be greater than zero"));
        }
        if self.retry_count == 0 {
            return Err(invalid("retry_count", "must be greater than zero"));
        }
        if self.retry_backoff == RetryBackoff::Exponential
            && self.retry_max_interval_secs < self.retry_interval_secs
        {
            return Err(invalid(
                "retry_max_interval_secs",
                "must not be below retry_interval_secs",
            ));
        }
        if self.yahoo.requests_per_minute == 0 {
            return Err(invalid("yahoo.requests_per_minute", "must be greater than zero"));
        }
        if self.crawl_timeout_secs == 0 {
            return Err(invalid("crawl_timeout_secs", "must be greater than zero"));
        }
        self.exchanges()?;
        if let Some(start) = &self.start {
            parse_date(start)?;
        }
        Ok(())
    }

    /// Configured exchanges, resolved against the built-in registry.
    pub fn exchanges(&self) -> Result<Vec<Exchange>, ConfigError> {
        if self.exchanges.is_empty() {
            return Err(invalid("exchanges", "at least one exchange is required"));
        }
        self.exchanges
            .iter()
            .map(|code| code.parse::<Exchange>().map_err(ConfigError::from))
            .collect()
    }

    /// First backfill date: `start` when set, else `last_days` before `today`.
    pub fn start_date(&self, today: NaiveDate) -> Result<NaiveDate, ConfigError> {
        if let Some(start) = &self.start {
            return Ok(parse_date(start)?);
        }
        today
            .checked_sub_days(Days::new(u64::from(self.last_days)))
            .ok_or_else(|| invalid("last_days", "reaches before the supported calendar"))
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            parallel: self.parallel,
            retry: self.retry_policy(),
            crawl_timeout: Duration::from_secs(self.crawl_timeout_secs),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        let interval = Duration::from_secs(self.retry_interval_secs);
        match self.retry_backoff {
            RetryBackoff::Fixed => RetryPolicy::fixed(self.retry_count, interval),
            RetryBackoff::Exponential => RetryPolicy::exponential(
                self.retry_count,
                interval,
                Duration::from_secs(self.retry_max_interval_secs),
            ),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_fields_take_daemon_defaults() {
        let config = Config::from_toml_str(r#"exchanges = ["Nasdaq"]"#).expect("parse");

        assert_eq!(config.parallel, 32);
        assert_eq!(config.retry_count, 10);
        assert_eq!(config.last_days, 20);
        assert_eq!(config.yahoo.base_url, YAHOO_CHART_BASE_URL);
        assert!(config.validate().is_ok());

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.retry.attempts(), 10);
        assert_eq!(scheduler.retry.delay_for_attempt(3), Duration::from_secs(30));
    }

    #[test]
    fn environment_overrides_store_and_token() {
        let mut config = Config::from_toml_str(
            r#"
exchanges = ["Hkex"]
store = "memory"

[notifier]
webhook_url = "https://hooks.example.test"
"#,
        )
        .expect("parse");
        let env = HashMap::from([
            (STORE_ENV, "duckdb|/tmp/q.duckdb"),
            (WEBHOOK_TOKEN_ENV, "s3cret"),
        ]);

        config.apply_env(|key| env.get(key).map(|value| (*value).to_owned()));

        assert_eq!(config.store, "duckdb|/tmp/q.duckdb");
        assert_eq!(config.notifier.bearer_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let cases = [
            ("exchanges = []", "exchanges"),
            (r#"exchanges = ["Nasdaq"]
parallel = 0"#, "parallel"),
            (r#"exchanges = ["Nasdaq"]
retry_count = 0"#, "retry_count"),
            (r#"exchanges = ["Nasdaq"]
store = " ""#, "store"),
            (r#"exchanges = ["Nasdaq"]
retry_backoff = "exponential"
retry_interval_secs = 60
retry_max_interval_secs = 10"#, "retry_max_interval_secs"),
        ];

        for (raw, field) in cases {
            let error = Config::from_toml_str(raw)
                .expect("parse")
                .validate()
                .expect_err(field);
            assert!(
                matches!(error, ConfigError::Invalid { field: got, .. } if got == field),
                "{field}: {error}"
            );
        }

        let unknown = Config::from_toml_str(r#"exchanges = ["Lse"]"#).expect("parse");
        assert!(matches!(unknown.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn exponential_backoff_is_capped_by_the_max_interval() {
        let config = Config::from_toml_str(
            r#"
exchanges = ["Nasdaq"]
retry_count = 6
retry_interval_secs = 10
retry_backoff = "exponential"
retry_max_interval_secs = 45
"#,
        )
        .expect("parse");
        assert!(config.validate().is_ok());

        let retry = config.scheduler_config().retry;
        assert_eq!(retry.attempts(), 6);
        for _ in 0..10 {
            let first = retry.delay_for_attempt(0);
            let late = retry.delay_for_attempt(5);
            assert!(first >= Duration::from_secs(5) && first <= Duration::from_secs(15), "{first:?}");
            assert!(late <= Duration::from_secs(68), "{late:?}");
            assert!(late >= Duration::from_millis(22_500), "{late:?}");
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("exchange = [\"Nasdaq\"]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn start_date_prefers_explicit_start() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 21).expect("date");
        let mut config = Config::default();
        assert_eq!(
            config.start_date(today).expect("start"),
            NaiveDate::from_ymd_opt(2024, 3, 1).expect("date")
        );

        config.start = Some(String::from("20240102"));
        assert_eq!(
            config.start_date(today).expect("start"),
            NaiveDate::from_ymd_opt(2024, 1, 2).expect("date")
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let temp = tempdir().expect("tempdir");
        let error = Config::load(&temp.path().join("absent.toml")).expect_err("missing");
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
