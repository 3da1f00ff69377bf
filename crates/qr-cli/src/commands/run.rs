use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use qr_core::calendar::{parse_date, Exchange};
use tracing::{info, warn};

use super::{build_scheduler, open_store};
use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::CliError;

pub async fn run(args: &RunArgs, config: &Config) -> Result<ExitCode, CliError> {
    let exchanges = match &args.exchanges {
        Some(list) => Exchange::parse_list(list)?,
        None => config.exchanges()?,
    };
    let start = match &args.start {
        Some(raw) => parse_date(raw)?,
        None => config.start_date(Utc::now().date_naive())?,
    };

    let store = open_store(config)?;
    let (scheduler, notifier) = build_scheduler(config, Arc::clone(&store))?;
    let codes = exchanges
        .iter()
        .map(Exchange::code)
        .collect::<Vec<_>>()
        .join(",");
    info!(exchanges = %codes, %start, store = %config.store, "starting scheduler");

    let outcome = tokio::select! {
        result = Arc::new(scheduler).run(exchanges, start) => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupt received, shutting down");
            Ok(())
        }
    };

    notifier.close();
    if let Err(error) = store.close() {
        warn!(%error, "store did not close cleanly");
    }
    outcome?;
    Ok(ExitCode::SUCCESS)
}
