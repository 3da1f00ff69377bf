mod crawl;
mod exists;
mod inspect;
mod run;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use qr_core::adapters::{Roster, YahooSource};
use qr_core::http_client::{HttpClient, ReqwestHttpClient};
use qr_core::notifier::{LogNotifier, MultiNotifier, Notifier, WebhookNotifier};
use qr_core::scheduler::Scheduler;
use qr_core::source::Source;
use qr_core::store::Store;
use qr_core::throttling::Throttle;
use serde::Serialize;
use tracing::warn;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::error::CliError;

pub async fn run(cli: &Cli, config: &Config) -> Result<ExitCode, CliError> {
    match &cli.command {
        Command::Run(args) => run::run(args, config).await,
        Command::Crawl(args) => crawl::run(args, config).await,
        Command::Exists(args) => exists::run(args, config),
        Command::Inspect(args) => inspect::run(args, config),
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn Store>, CliError> {
    Ok(qr_warehouse::open_store(&config.store)?)
}

/// Wire the Yahoo source, roster and notifiers around `store`.
///
/// The notifier is returned alongside so callers can close it on shutdown.
fn build_scheduler(
    config: &Config,
    store: Arc<dyn Store>,
) -> Result<(Scheduler, Arc<dyn Notifier>), CliError> {
    let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());

    let roster = match &config.roster {
        Some(path) => Roster::from_path(path)?,
        None => {
            warn!("no roster configured, every exchange will record an empty company list");
            Roster::new()
        }
    };
    let source = Arc::new(
        YahooSource::new(Arc::clone(&http_client), roster)
            .with_base_url(config.yahoo.base_url.as_str())
            .with_throttle(Throttle::per_minute(config.yahoo.requests_per_minute))
            .with_timeout_ms(config.crawl_timeout_secs.saturating_mul(1_000)),
    );
    let notifier = build_notifier(config, http_client);

    let mut scheduler = Scheduler::new(
        store,
        Arc::clone(&source) as Arc<dyn Source>,
        Arc::clone(&notifier),
        config.scheduler_config(),
    );
    if config.yahoo.split_dividend_lookup {
        scheduler = scheduler.with_split_dividend_source(source);
    }
    Ok((scheduler, notifier))
}

fn build_notifier(config: &Config, http_client: Arc<dyn HttpClient>) -> Arc<dyn Notifier> {
    let log: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let mut notifier = MultiNotifier::new(vec![log]);
    if let Some(url) = &config.notifier.webhook_url {
        let mut webhook = WebhookNotifier::new(http_client, url.as_str());
        if let Some(token) = &config.notifier.bearer_token {
            webhook = webhook.with_bearer_token(token.as_str());
        }
        notifier.push(Arc::new(webhook));
    }
    Arc::new(notifier)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, value)?;
    writeln!(handle)?;
    Ok(())
}
