//! Yahoo Finance v8 chart source.
//!
//! One request per company and date fetches every 1-minute bar of the local day
//! (pre and post market included) plus dividend and split events. Bars are
//! split into session segments by the regular trading period the response
//! advertises.
//!
//! | Response | Outcome |
//! |----------|---------|
//! | HTTP 404 or chart error `Not Found` | `Ok(None)`, permanent |
//! | HTTP 429 | rate limited, transient |
//! | other non-2xx, malformed body | transient |

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use crate::adapters::roster::Roster;
use crate::calendar::Exchange;
use crate::domain::{Company, CompanyDailyQuote, Dividend, Quote, SerialKind, Split};
use crate::http_client::{HttpClient, HttpRequest};
use crate::source::{ReadyFuture, Source, SourceError, SourceFuture, SplitDividendSource};
use crate::throttling::Throttle;

pub const YAHOO_CHART_BASE_URL: &str = "https://query2.finance.yahoo.com";

const NOT_FOUND_CODE: &str = "Not Found";

pub struct YahooSource {
    http_client: Arc<dyn HttpClient>,
    roster: Roster,
    base_url: String,
    throttle: Option<Throttle>,
    timeout_ms: u64,
}

impl YahooSource {
    pub fn new(http_client: Arc<dyn HttpClient>, roster: Roster) -> Self {
        Self {
            http_client,
            roster,
            base_url: YAHOO_CHART_BASE_URL.to_owned(),
            throttle: None,
            timeout_ms: 10_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn chart_url(&self, symbol: &str, start: i64, end: i64, interval: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}?period1={start}&period2={end}&interval={interval}\
             &includePrePost=true&events=div%7Csplit",
            self.base_url,
            urlencoding::encode(symbol),
        )
    }

    /// Fetch the chart for the local day; `None` when Yahoo does not know the symbol.
    async fn fetch_chart(
        &self,
        exchange: &Exchange,
        company: &Company,
        date: NaiveDate,
        interval: &str,
    ) -> Result<Option<ChartResult>, SourceError> {
        let (start, end) = exchange.day_bounds(date);
        let symbol = format!("{}{}", company.code, exchange.yahoo_suffix());
        let url = self.chart_url(&symbol, start, end, interval);

        let request = HttpRequest::get(url).with_timeout_ms(self.timeout_ms);
        let response = self.http_client.execute(request).await.map_err(|error| {
            if error.is_timeout() {
                SourceError::timeout(format!("yahoo chart for {symbol} timed out: {error}"))
            } else {
                SourceError::unavailable(format!("yahoo chart for {symbol} failed: {error}"))
            }
        })?;

        match response.status {
            404 => {
                debug!(symbol = %symbol, "yahoo reports symbol not found");
                return Ok(None);
            }
            429 => {
                return Err(SourceError::rate_limited(format!(
                    "yahoo rate limited the chart request for {symbol}"
                )))
            }
            _ if !response.is_success() => {
                return Err(SourceError::unavailable(format!(
                    "yahoo chart for {symbol} returned status {}",
                    response.status
                )))
            }
            _ => {}
        }

        let payload: ChartResponse = serde_json::from_str(&response.body).map_err(|error| {
            SourceError::invalid_response(format!("yahoo chart for {symbol} is malformed: {error}"))
        })?;

        if let Some(error) = payload.chart.error {
            if error.code == NOT_FOUND_CODE {
                debug!(symbol = %symbol, "yahoo reports symbol not found");
                return Ok(None);
            }
            return Err(SourceError::unavailable(format!(
                "yahoo chart error for {symbol}: {} {}",
                error.code, error.description
            )));
        }

        payload
            .chart
            .result
            .into_iter()
            .flatten()
            .next()
            .map(Some)
            .ok_or_else(|| {
                SourceError::invalid_response(format!("yahoo chart for {symbol} has no result"))
            })
    }
}

impl YahooSource {
    async fn wait_for_slot(&self) {
        if let Some(throttle) = &self.throttle {
            throttle.ready().await;
        }
    }
}

impl Source for YahooSource {
    fn companies<'a>(&'a self, exchange: &'a Exchange) -> SourceFuture<'a, Vec<Company>> {
        Box::pin(async move { Ok(self.roster.companies(exchange.code())) })
    }

    fn crawl<'a>(
        &'a self,
        exchange: &'a Exchange,
        company: &'a Company,
        date: NaiveDate,
    ) -> SourceFuture<'a, Option<CompanyDailyQuote>> {
        Box::pin(async move {
            let Some(result) = self.fetch_chart(exchange, company, date, "1m").await? else {
                return Ok(None);
            };
            let (start, end) = exchange.day_bounds(date);
            result.into_company_daily(company.clone(), start, end).map(Some)
        })
    }

    fn ready(&self) -> ReadyFuture<'_> {
        Box::pin(self.wait_for_slot())
    }
}

impl SplitDividendSource for YahooSource {
    fn query_split_and_dividend<'a>(
        &'a self,
        exchange: &'a Exchange,
        company: &'a Company,
        date: NaiveDate,
    ) -> SourceFuture<'a, (Option<Dividend>, Option<Split>)> {
        Box::pin(async move {
            let Some(result) = self.fetch_chart(exchange, company, date, "1d").await? else {
                return Ok((None, None));
            };
            let (start, end) = exchange.day_bounds(date);
            Ok(result.events.within(start, end))
        })
    }

    fn ready(&self) -> ReadyFuture<'_> {
        Box::pin(self.wait_for_slot())
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    events: ChartEvents,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    current_trading_period: Option<CurrentTradingPeriod>,
    #[serde(default)]
    trading_periods: Option<TradingPeriods>,
}

/// Yahoo returns trading periods either as a bare nested list or split by segment.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TradingPeriods {
    Nested(Vec<Vec<TradingPeriod>>),
    Segmented {
        #[serde(default)]
        regular: Vec<Vec<TradingPeriod>>,
    },
}

#[derive(Debug, Deserialize)]
struct CurrentTradingPeriod {
    #[serde(default)]
    regular: Option<TradingPeriod>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct TradingPeriod {
    start: i64,
    end: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: BTreeMap<String, YahooDividend>,
    #[serde(default)]
    splits: BTreeMap<String, YahooSplit>,
}

#[derive(Debug, Deserialize)]
struct YahooDividend {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct YahooSplit {
    date: i64,
    numerator: f64,
    denominator: f64,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartEvents {
    /// Earliest dividend and split inside `[start, end)`.
    fn within(&self, start: i64, end: i64) -> (Option<Dividend>, Option<Split>) {
        let in_window = |date: i64| date >= start && date < end;

        let dividend = self
            .dividends
            .values()
            .filter(|dividend| in_window(dividend.date))
            .min_by_key(|dividend| dividend.date)
            .map(|dividend| Dividend {
                timestamp: dividend.date as u64,
                amount: dividend.amount as f32,
            });
        let split = self
            .splits
            .values()
            .filter(|split| in_window(split.date))
            .min_by_key(|split| split.date)
            .map(|split| Split {
                timestamp: split.date as u64,
                numerator: split.numerator as f32,
                denominator: split.denominator as f32,
            });

        (dividend, split)
    }
}

impl ChartMeta {
    fn regular_period(&self) -> Option<TradingPeriod> {
        let from_list = match &self.trading_periods {
            Some(TradingPeriods::Nested(periods)) => periods.first().and_then(|day| day.first()),
            Some(TradingPeriods::Segmented { regular }) => {
                regular.first().and_then(|day| day.first())
            }
            None => None,
        };
        from_list.copied().or_else(|| {
            self.current_trading_period
                .as_ref()
                .and_then(|current| current.regular)
        })
    }
}

impl ChartResult {
    fn into_company_daily(
        self,
        company: Company,
        start: i64,
        end: i64,
    ) -> Result<CompanyDailyQuote, SourceError> {
        let mut daily = CompanyDailyQuote::new(company);
        (daily.dividend, daily.split) = self.events.within(start, end);

        let Some(series) = self.indicators.quote.into_iter().next() else {
            return Ok(daily);
        };
        let len = self.timestamp.len();
        if [
            series.open.len(),
            series.close.len(),
            series.high.len(),
            series.low.len(),
            series.volume.len(),
        ]
        .iter()
        .any(|other| *other != len)
        {
            return Err(SourceError::invalid_response(format!(
                "yahoo series length mismatch for {}",
                daily.company.code
            )));
        }
        if len == 0 {
            return Ok(daily);
        }

        let Some(regular) = self.meta.regular_period() else {
            return Err(SourceError::invalid_response(format!(
                "yahoo chart for {} has bars but no regular trading period",
                daily.company.code
            )));
        };

        for (index, timestamp) in self.timestamp.iter().copied().enumerate() {
            if timestamp < start || timestamp >= end {
                continue;
            }
            let (Some(open), Some(close), Some(high), Some(low)) = (
                series.open[index],
                series.close[index],
                series.high[index],
                series.low[index],
            ) else {
                continue;
            };
            let quote = Quote {
                timestamp: timestamp as u64,
                open: open as f32,
                close: close as f32,
                high: high as f32,
                low: low as f32,
                volume: series.volume[index].unwrap_or_default().max(0.0) as u64,
            };
            if quote.is_blank() {
                continue;
            }

            let kind = if timestamp < regular.start {
                SerialKind::Pre
            } else if timestamp < regular.end {
                SerialKind::Regular
            } else {
                SerialKind::Post
            };
            daily.serial_mut(kind).push(quote);
        }

        for kind in SerialKind::ALL {
            daily.serial_mut(kind).sort_by_timestamp();
        }
        Ok(daily)
    }
}
