use std::process::ExitCode;

use chrono::NaiveDate;
use qr_core::calendar::{parse_date, Exchange};
use serde::Serialize;

use super::{open_store, print_json};
use crate::cli::ExistsArgs;
use crate::config::Config;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct ExistsReport<'a> {
    exchange: &'a str,
    date: NaiveDate,
    exists: bool,
}

pub fn run(args: &ExistsArgs, config: &Config) -> Result<ExitCode, CliError> {
    let exchange: Exchange = args.exchange.parse()?;
    let date = parse_date(&args.date)?;

    let store = open_store(config)?;
    let exists = store.exists(exchange.code(), date)?;
    store.close()?;

    print_json(&ExistsReport {
        exchange: exchange.code(),
        date,
        exists,
    })?;
    Ok(if exists {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
