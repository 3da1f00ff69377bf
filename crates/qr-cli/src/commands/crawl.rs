use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use qr_core::calendar::{date_range, parse_date, Exchange};
use serde::Serialize;

use super::{build_scheduler, open_store, print_json};
use crate::cli::CrawlArgs;
use crate::config::Config;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct CrawlReport<'a> {
    exchange: &'a str,
    from: NaiveDate,
    to: NaiveDate,
    dates: usize,
    attempts: u32,
}

pub async fn run(args: &CrawlArgs, config: &Config) -> Result<ExitCode, CliError> {
    let exchange: Exchange = args.exchange.parse()?;
    let from = parse_date(&args.date)?;
    let to = args.to.as_deref().map(parse_date).transpose()?.unwrap_or(from);
    if to < from {
        return Err(CliError::Command(format!(
            "--to {to} is earlier than --date {from}"
        )));
    }
    let dates = date_range(from, to);

    let store = open_store(config)?;
    let (scheduler, notifier) = build_scheduler(config, Arc::clone(&store))?;
    let result = scheduler.crawl_with_retry(&exchange, &dates).await;
    notifier.close();
    store.close()?;

    let attempts = result?;
    print_json(&CrawlReport {
        exchange: exchange.code(),
        from,
        to,
        dates: dates.len(),
        attempts,
    })?;
    Ok(ExitCode::SUCCESS)
}
