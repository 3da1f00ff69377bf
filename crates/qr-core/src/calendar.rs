//! Exchange registry and exchange-local calendar arithmetic.
//!
//! | Code | Time zone | Yahoo suffix |
//! |------|-----------|--------------|
//! | `Nasdaq` | America/New_York | |
//! | `Nyse` | America/New_York | |
//! | `Amex` | America/New_York | |
//! | `Sse` | Asia/Shanghai | `.SS` |
//! | `Szse` | Asia/Shanghai | `.SZ` |
//! | `Hkex` | Asia/Hong_Kong | `.HK` |

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{validate_key_component, ValidationError};

const BUILTIN: [(&str, Tz, &str); 6] = [
    ("Nasdaq", chrono_tz::America::New_York, ""),
    ("Nyse", chrono_tz::America::New_York, ""),
    ("Amex", chrono_tz::America::New_York, ""),
    ("Sse", chrono_tz::Asia::Shanghai, ".SS"),
    ("Szse", chrono_tz::Asia::Shanghai, ".SZ"),
    ("Hkex", chrono_tz::Asia::Hong_Kong, ".HK"),
];

/// A stock exchange and the local calendar its trading days follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    code: String,
    timezone: Tz,
    yahoo_suffix: String,
}

impl Exchange {
    pub fn new(
        code: impl Into<String>,
        timezone: Tz,
        yahoo_suffix: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let code = code.into();
        validate_key_component("exchange code", &code)?;
        Ok(Self {
            code,
            timezone,
            yahoo_suffix: yahoo_suffix.into(),
        })
    }

    /// Every exchange known out of the box.
    pub fn builtin() -> Vec<Self> {
        BUILTIN
            .iter()
            .map(|(code, timezone, suffix)| Self {
                code: (*code).to_owned(),
                timezone: *timezone,
                yahoo_suffix: (*suffix).to_owned(),
            })
            .collect()
    }

    /// Parse a comma separated list such as `Nasdaq,Nyse`.
    pub fn parse_list(value: &str) -> Result<Vec<Self>, ValidationError> {
        let exchanges = value
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Self>, _>>()?;
        if exchanges.is_empty() {
            return Err(ValidationError::Empty { what: "exchange list" });
        }
        Ok(exchanges)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn yahoo_suffix(&self) -> &str {
        &self.yahoo_suffix
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    pub fn yesterday(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = self.today(now);
        today.pred_opt().unwrap_or(today)
    }

    /// First instant of `date` on the exchange's wall clock.
    ///
    /// Zones that skip midnight on a DST transition start the day at the first
    /// representable local hour.
    pub fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        let mut local = date.and_time(NaiveTime::MIN);
        for _ in 0..4 {
            if let Some(instant) = self.timezone.from_local_datetime(&local).earliest() {
                return instant.with_timezone(&Utc);
            }
            local += TimeDelta::hours(1);
        }
        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
    }

    /// `[start, end)` of `date` in epoch seconds.
    pub fn day_bounds(&self, date: NaiveDate) -> (i64, i64) {
        let next = date.succ_opt().unwrap_or(date);
        (
            self.day_start(date).timestamp(),
            self.day_start(next).timestamp(),
        )
    }

    pub fn next_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = self.today(now);
        loop {
            let Some(next) = date.succ_opt() else {
                return now;
            };
            let start = self.day_start(next);
            if start > now {
                return start;
            }
            date = next;
        }
    }

    /// Wall time left until the next local midnight, measured from `now`.
    pub fn until_next_midnight(&self, now: DateTime<Utc>) -> Duration {
        (self.next_midnight(now) - now).to_std().unwrap_or_default()
    }
}

impl Display for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for Exchange {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Self::builtin()
            .into_iter()
            .find(|exchange| exchange.code.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ValidationError::UnknownExchange {
                value: wanted.to_owned(),
            })
    }
}

/// Inclusive list of dates from `start` through `end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|date| *date <= end).collect()
}

/// Accepts `YYYY-MM-DD` or the compact `YYYYMMDD` form.
pub fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .map_err(|_| ValidationError::InvalidDate {
            value: trimmed.to_owned(),
        })
}

/// Compact `YYYYMMDD` rendering used in keys and logs.
pub fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    fn date(value: &str) -> NaiveDate {
        parse_date(value).expect("date")
    }

    #[test]
    fn yesterday_follows_the_exchange_calendar() {
        let nasdaq: Exchange = "nasdaq".parse().expect("nasdaq");
        let hkex: Exchange = "Hkex".parse().expect("hkex");
        // 02:00 UTC is still the previous evening in New York
        let now = utc("2024-03-15T02:00:00Z");

        assert_eq!(nasdaq.yesterday(now), date("2024-03-13"));
        assert_eq!(hkex.yesterday(now), date("2024-03-14"));
    }

    #[test]
    fn next_midnight_accounts_for_daylight_saving() {
        let nyse: Exchange = "Nyse".parse().expect("nyse");
        // the night the clocks spring forward
        let now = utc("2024-03-10T12:00:00Z");

        assert_eq!(nyse.next_midnight(now), utc("2024-03-11T04:00:00Z"));
        assert_eq!(nyse.until_next_midnight(now), Duration::from_secs(16 * 3_600));
    }

    #[test]
    fn day_bounds_span_local_day() {
        let sse: Exchange = "Sse".parse().expect("sse");
        let (start, end) = sse.day_bounds(date("2024-03-15"));

        assert_eq!(start, utc("2024-03-14T16:00:00Z").timestamp());
        assert_eq!(end - start, 86_400);
    }

    #[test]
    fn exchange_lists_reject_unknown_codes() {
        let parsed = Exchange::parse_list("Nasdaq, Sse").expect("known codes");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].yahoo_suffix(), ".SS");

        assert_eq!(
            Exchange::parse_list("Nasdaq,Lse"),
            Err(ValidationError::UnknownExchange {
                value: String::from("Lse")
            })
        );
        assert!(Exchange::parse_list(" , ").is_err());
    }

    #[test]
    fn date_range_is_inclusive() {
        let dates = date_range(date("2024-02-28"), date("2024-03-01"));
        assert_eq!(
            dates,
            vec![date("2024-02-28"), date("2024-02-29"), date("2024-03-01")]
        );
        assert!(date_range(date("2024-03-02"), date("2024-03-01")).is_empty());
    }

    #[test]
    fn dates_parse_in_both_forms() {
        assert_eq!(parse_date("20240315"), parse_date("2024-03-15"));
        assert_eq!(compact_date(date("2024-03-05")), "20240305");
        assert!(parse_date("15/03/2024").is_err());
    }
}
