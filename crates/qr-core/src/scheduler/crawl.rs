use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{Scheduler, SchedulerError};
use crate::calendar::Exchange;
use crate::domain::{Company, CompanyDailyQuote, ExchangeDailyQuote};
use crate::source::{Source, SourceError, SplitDividendSource};

impl Scheduler {
    /// Crawl and save each date in order, fetching the roster once.
    ///
    /// A save failure aborts the remaining dates, and so does a date on which
    /// every roster company failed. Otherwise failing companies are only left
    /// out of the record.
    pub async fn crawl(
        &self,
        exchange: &Exchange,
        dates: &[NaiveDate],
    ) -> Result<(), SchedulerError> {
        if dates.is_empty() {
            return Ok(());
        }

        let roster = self
            .source
            .companies(exchange)
            .await
            .map_err(|source| SchedulerError::Roster {
                exchange: exchange.code().to_owned(),
                source,
            })?;
        info!(
            exchange = %exchange,
            companies = roster.len(),
            dates = dates.len(),
            "crawl batch started"
        );

        for date in dates {
            let (record, failed) = self.assemble_day(exchange, &roster, *date).await;
            if !roster.is_empty() && failed == roster.len() {
                error!(exchange = %exchange, %date, failed, "every company failed, not saving the day");
                return Err(SchedulerError::NoCompanyCrawled {
                    exchange: exchange.code().to_owned(),
                    date: *date,
                    companies: failed,
                });
            }
            self.save(exchange, record).await?;
        }
        Ok(())
    }

    /// Crawl every roster company for one date and assemble the day record.
    ///
    /// Every roster company lands in `companies`; only companies with at least
    /// one bar land in `quotes`.
    pub async fn crawl_one_day(
        &self,
        exchange: &Exchange,
        roster: &[Company],
        date: NaiveDate,
    ) -> ExchangeDailyQuote {
        self.assemble_day(exchange, roster, date).await.0
    }

    /// The day record plus how many companies failed with a transient error.
    async fn assemble_day(
        &self,
        exchange: &Exchange,
        roster: &[Company],
        date: NaiveDate,
    ) -> (ExchangeDailyQuote, usize) {
        let slots = Arc::new(Semaphore::new(self.config.parallel.max(1)));
        let mut tasks = JoinSet::new();

        for company in roster {
            // the semaphore is owned here and never closed
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };
            let source = Arc::clone(&self.source);
            let split_dividend = self.split_dividend.clone();
            let exchange = exchange.clone();
            let company = company.clone();
            let timeout = self.config.crawl_timeout;

            tasks.spawn(async move {
                let result = crawl_company(
                    source.as_ref(),
                    split_dividend.as_deref(),
                    &exchange,
                    &company,
                    date,
                    timeout,
                )
                .await;
                drop(permit);
                (company, result)
            });
        }

        let mut record = ExchangeDailyQuote::new(exchange.code(), date);
        for company in roster {
            record
                .companies
                .insert(company.code.clone(), company.clone());
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((company, Ok(quote))) => record.insert(company, quote),
                Ok((company, Err(error))) => {
                    failed += 1;
                    warn!(
                        exchange = %exchange,
                        %date,
                        company = %company.code,
                        code = error.code(),
                        %error,
                        "company crawl failed, omitting from record"
                    );
                }
                Err(join_error) => {
                    failed += 1;
                    error!(
                        exchange = %exchange,
                        %date,
                        error = %join_error,
                        "company crawl task panicked"
                    );
                }
            }
        }

        debug!(
            exchange = %exchange,
            %date,
            companies = record.companies.len(),
            quotes = record.quotes.len(),
            failed,
            "day assembled"
        );
        (record, failed)
    }

    async fn save(
        &self,
        exchange: &Exchange,
        record: ExchangeDailyQuote,
    ) -> Result<(), SchedulerError> {
        let store = Arc::clone(&self.store);
        let code = exchange.code().to_owned();
        let date = record.date;
        let companies = record.companies.len();
        let quotes = record.quotes.len();

        let joined = tokio::task::spawn_blocking(move || store.save(&code, date, &record)).await;
        match joined {
            Ok(Ok(())) => {
                info!(exchange = %exchange, %date, companies, quotes, "day saved");
                Ok(())
            }
            Ok(Err(source)) => {
                error!(exchange = %exchange, %date, error = %source, "day save failed");
                Err(SchedulerError::Save {
                    exchange: exchange.code().to_owned(),
                    date,
                    source,
                })
            }
            Err(join_error) => Err(SchedulerError::Task {
                exchange: exchange.code().to_owned(),
                message: join_error.to_string(),
            }),
        }
    }
}

/// Crawl one company, mapping "no data" outcomes to `Ok(None)`.
///
/// `timeout` bounds each source call, not the wait for the source's request slot.
async fn crawl_company(
    source: &dyn Source,
    split_dividend: Option<&dyn SplitDividendSource>,
    exchange: &Exchange,
    company: &Company,
    date: NaiveDate,
    timeout: Duration,
) -> Result<Option<CompanyDailyQuote>, SourceError> {
    source.ready().await;
    let crawled = tokio::time::timeout(timeout, source.crawl(exchange, company, date))
        .await
        .map_err(|_| {
            SourceError::timeout(format!(
                "crawl of {} exceeded {}s",
                company.code,
                timeout.as_secs()
            ))
        })?;

    let mut quote = match crawled {
        Ok(Some(quote)) => quote,
        Ok(None) => {
            debug!(company = %company.code, %date, "no data");
            return Ok(None);
        }
        Err(error) if error.is_permanent_not_found() => {
            debug!(company = %company.code, %date, %error, "symbol not found");
            return Ok(None);
        }
        Err(error) => return Err(error),
    };
    quote.company = company.clone();
    if quote.is_empty() {
        return Ok(None);
    }

    if let Some(lookup) = split_dividend {
        lookup.ready().await;
        match tokio::time::timeout(
            timeout,
            lookup.query_split_and_dividend(exchange, company, date),
        )
        .await
        {
            Ok(Ok((dividend, split))) => {
                quote.dividend = dividend;
                quote.split = split;
            }
            Ok(Err(error)) => warn!(
                company = %company.code,
                %date,
                %error,
                "split/dividend lookup failed, keeping crawled values"
            ),
            Err(_) => warn!(
                company = %company.code,
                %date,
                "split/dividend lookup timed out, keeping crawled values"
            ),
        }
    }
    Ok(Some(quote))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::calendar::FixedClock;
    use crate::domain::{Dividend, Quote, Serial};
    use crate::notifier::LogNotifier;
    use crate::scheduler::SchedulerConfig;
    use crate::source::{ReadyFuture, SourceFuture};
    use crate::store::{Store, StoreError};

    struct ScriptedSource {
        roster: Vec<Company>,
    }

    impl Source for ScriptedSource {
        fn companies<'a>(&'a self, _exchange: &'a Exchange) -> SourceFuture<'a, Vec<Company>> {
            let roster = self.roster.clone();
            Box::pin(async move { Ok(roster) })
        }

        fn crawl<'a>(
            &'a self,
            _exchange: &'a Exchange,
            company: &'a Company,
            _date: NaiveDate,
        ) -> SourceFuture<'a, Option<CompanyDailyQuote>> {
            Box::pin(async move {
                match company.code.as_str() {
                    "GONE" => Err(SourceError::not_found("symbol delisted")),
                    "FLAKY" => Err(SourceError::unavailable("upstream 502")),
                    "HALT" => Ok(Some(CompanyDailyQuote::new(company.clone()))),
                    "SLOW" => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(None)
                    }
                    _ => {
                        let mut quote = CompanyDailyQuote::new(Company::new("WRONG", "wrong"));
                        quote.regular = Serial::from(vec![Quote {
                            timestamp: 1_710_509_400,
                            open: 1.0,
                            close: 2.0,
                            high: 2.5,
                            low: 0.5,
                            volume: 10,
                        }]);
                        Ok(Some(quote))
                    }
                }
            })
        }
    }

    /// Source whose request slot frees up only after `backlog`.
    struct BackloggedSource {
        inner: ScriptedSource,
        backlog: Duration,
    }

    impl Source for BackloggedSource {
        fn companies<'a>(&'a self, exchange: &'a Exchange) -> SourceFuture<'a, Vec<Company>> {
            self.inner.companies(exchange)
        }

        fn crawl<'a>(
            &'a self,
            exchange: &'a Exchange,
            company: &'a Company,
            date: NaiveDate,
        ) -> SourceFuture<'a, Option<CompanyDailyQuote>> {
            self.inner.crawl(exchange, company, date)
        }

        fn ready(&self) -> ReadyFuture<'_> {
            Box::pin(tokio::time::sleep(self.backlog))
        }
    }

    struct FixedDividend;

    impl SplitDividendSource for FixedDividend {
        fn query_split_and_dividend<'a>(
            &'a self,
            _exchange: &'a Exchange,
            _company: &'a Company,
            _date: NaiveDate,
        ) -> SourceFuture<'a, (Option<Dividend>, Option<crate::domain::Split>)> {
            Box::pin(async move {
                Ok((
                    Some(Dividend {
                        timestamp: 1_710_509_400,
                        amount: 0.24,
                    }),
                    None,
                ))
            })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<ExchangeDailyQuote>>,
    }

    impl Store for RecordingStore {
        fn exists(&self, _exchange: &str, _date: NaiveDate) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn save(
            &self,
            _exchange: &str,
            _date: NaiveDate,
            record: &ExchangeDailyQuote,
        ) -> Result<(), StoreError> {
            self.saved.lock().expect("saved lock").push(record.clone());
            Ok(())
        }

        fn load(&self, exchange: &str, date: NaiveDate) -> Result<ExchangeDailyQuote, StoreError> {
            Err(StoreError::NotFound {
                exchange: exchange.to_owned(),
                date,
            })
        }

        fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn roster(codes: &[&str]) -> Vec<Company> {
        codes.iter().map(|code| Company::new(*code, *code)).collect()
    }

    fn scheduler(codes: &[&str], store: Arc<RecordingStore>) -> Scheduler {
        let config = SchedulerConfig {
            crawl_timeout: Duration::from_secs(5),
            ..SchedulerConfig::default()
        };
        Scheduler::new(
            store,
            Arc::new(ScriptedSource {
                roster: roster(codes),
            }),
            Arc::new(LogNotifier),
            config,
        )
        .with_clock(Arc::new(FixedClock(chrono::Utc::now())))
    }

    fn exchange() -> Exchange {
        "nasdaq".parse().expect("exchange")
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).expect("date")
    }

    #[tokio::test(start_paused = true)]
    async fn failed_and_empty_companies_stay_in_roster_but_not_quotes() {
        let codes = ["AAPL", "GONE", "FLAKY", "HALT", "SLOW"];
        let scheduler = scheduler(&codes, Arc::new(RecordingStore::default()));

        let record = scheduler
            .crawl_one_day(&exchange(), &roster(&codes), date())
            .await;

        assert_eq!(record.companies.len(), 5);
        assert_eq!(record.quotes.keys().collect::<Vec<_>>(), vec!["AAPL"]);
        assert_eq!(record.quotes["AAPL"].company.code, "AAPL");
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_a_request_slot_does_not_count_toward_the_timeout() {
        let source = BackloggedSource {
            inner: ScriptedSource {
                roster: roster(&["AAPL"]),
            },
            backlog: Duration::from_secs(60),
        };
        let started = tokio::time::Instant::now();

        let quote = crawl_company(
            &source,
            None,
            &exchange(),
            &Company::new("AAPL", "Apple"),
            date(),
            Duration::from_secs(5),
        )
        .await
        .expect("crawl after backlog");

        assert!(quote.is_some());
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn day_where_every_company_failed_is_not_saved() {
        let store = Arc::new(RecordingStore::default());
        let scheduler = scheduler(&["FLAKY", "SLOW"], store.clone());

        let error = scheduler
            .crawl(&exchange(), &[date()])
            .await
            .expect_err("nothing crawled");

        assert!(
            matches!(error, SchedulerError::NoCompanyCrawled { companies: 2, .. }),
            "{error}"
        );
        assert_eq!(error.failed_date(), Some(date()));
        assert!(store.saved.lock().expect("saved lock").is_empty());
    }

    #[tokio::test]
    async fn split_dividend_lookup_overrides_crawled_values() {
        let store = Arc::new(RecordingStore::default());
        let scheduler = scheduler(&["AAPL"], store.clone())
            .with_split_dividend_source(Arc::new(FixedDividend));

        scheduler
            .crawl(&exchange(), &[date()])
            .await
            .expect("crawl succeeds");

        let saved = store.saved.lock().expect("saved lock");
        assert_eq!(saved.len(), 1);
        let dividend = saved[0].quotes["AAPL"].dividend.expect("dividend");
        assert_eq!(dividend.amount, 0.24);
    }

    #[tokio::test]
    async fn empty_batch_skips_the_roster_fetch() {
        let store = Arc::new(RecordingStore::default());
        let scheduler = scheduler(&["AAPL"], store.clone());

        scheduler.crawl(&exchange(), &[]).await.expect("no-op");

        assert!(store.saved.lock().expect("saved lock").is_empty());
    }
}
