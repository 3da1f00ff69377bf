use std::process::ExitCode;

use chrono::NaiveDate;
use qr_core::calendar::{parse_date, Exchange};
use qr_core::domain::{CompanyDailyQuote, Dividend, ExchangeDailyQuote, Quote, SerialKind, Split};
use serde::Serialize;

use super::{open_store, print_json};
use crate::cli::InspectArgs;
use crate::config::Config;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct RecordSummary<'a> {
    exchange: &'a str,
    date: NaiveDate,
    version: u8,
    trading_day: bool,
    companies: usize,
    quotes: usize,
    details: Vec<CompanySummary<'a>>,
}

#[derive(Debug, Serialize)]
struct CompanySummary<'a> {
    code: &'a str,
    name: &'a str,
    dividend: Option<Dividend>,
    split: Option<Split>,
    pre: SegmentSummary,
    regular: SegmentSummary,
    post: SegmentSummary,
}

#[derive(Debug, Serialize)]
struct SegmentSummary {
    bars: usize,
    rollup: Quote,
}

pub fn run(args: &InspectArgs, config: &Config) -> Result<ExitCode, CliError> {
    let exchange: Exchange = args.exchange.parse()?;
    let date = parse_date(&args.date)?;

    let store = open_store(config)?;
    let record = store.load(exchange.code(), date)?;
    store.close()?;

    print_json(&summarize(&record, args.company.as_deref())?)?;
    Ok(ExitCode::SUCCESS)
}

fn summarize<'a>(
    record: &'a ExchangeDailyQuote,
    company: Option<&str>,
) -> Result<RecordSummary<'a>, CliError> {
    let details = match company {
        Some(code) => {
            if !record.companies.contains_key(code) {
                return Err(CliError::Command(format!(
                    "company '{code}' is not listed for {} on {}",
                    record.exchange, record.date
                )));
            }
            record.quotes.get(code).map(summarize_company).into_iter().collect()
        }
        None => record.quotes.values().map(summarize_company).collect(),
    };

    Ok(RecordSummary {
        exchange: &record.exchange,
        date: record.date,
        version: record.version,
        trading_day: record.is_trading_day(),
        companies: record.companies.len(),
        quotes: record.quotes.len(),
        details,
    })
}

fn summarize_company(quote: &CompanyDailyQuote) -> CompanySummary<'_> {
    let segment = |kind: SerialKind| SegmentSummary {
        bars: quote.serial(kind).len(),
        rollup: quote.rollup(kind),
    };
    CompanySummary {
        code: &quote.company.code,
        name: &quote.company.name,
        dividend: quote.dividend,
        split: quote.split,
        pre: segment(SerialKind::Pre),
        regular: segment(SerialKind::Regular),
        post: segment(SerialKind::Post),
    }
}
