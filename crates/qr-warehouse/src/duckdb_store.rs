//! Typed-table backend on DuckDB.
//!
//! | Table | Rows per day |
//! |-------|--------------|
//! | `exchange_days` | one header row carrying the record version |
//! | `day_companies` | one per considered company |
//! | `company_events` | one per company with bars, holding dividend and split |
//! | `quote_bars` | one per bar, ordered by `seq` within its segment |
//!
//! A save deletes the day, inserts the new rows, reads them back on the same
//! connection, and commits only when the read-back equals the input. Loads
//! read inside a transaction so a concurrent commit is seen whole or not at all.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use ::duckdb::{Connection, ToSql};
use chrono::NaiveDate;
use qr_core::domain::{
    Company, CompanyDailyQuote, Dividend, ExchangeDailyQuote, Quote, SerialKind, Split,
    CURRENT_VERSION,
};
use qr_core::error::{validate_key_component, CodecError};
use qr_core::store::{check_save_request, verify_read_back, ReadInterceptor, Store, StoreError};
use tracing::{debug, warn};

use crate::duckdb::{DuckDbConnectionManager, PooledConnection};
use crate::{migrations, WarehouseError};

const DEFAULT_POOL_SIZE: usize = 4;

const DAY_TABLES: [&str; 4] = ["quote_bars", "company_events", "day_companies", "exchange_days"];

pub struct DuckDbStore {
    manager: DuckDbConnectionManager,
    save_lock: Mutex<()>,
    read_interceptor: Option<ReadInterceptor>,
    closed: AtomicBool,
}

impl DuckDbStore {
    /// Open or create the database file and bring its schema up to date.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(path, DEFAULT_POOL_SIZE)?;
        {
            let connection = manager.acquire()?;
            migrations::apply_migrations(&connection)?;
        }

        Ok(Self {
            manager,
            save_lock: Mutex::new(()),
            read_interceptor: None,
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_read_interceptor(mut self, interceptor: ReadInterceptor) -> Self {
        self.read_interceptor = Some(interceptor);
        self
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    fn ensure_open(&self) -> Result<(), WarehouseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed.into());
        }
        Ok(())
    }

    fn intercept(&self, record: &mut ExchangeDailyQuote) {
        if let Some(interceptor) = &self.read_interceptor {
            interceptor(record);
        }
    }

    fn exists_day(&self, exchange: &str, date: NaiveDate) -> Result<bool, WarehouseError> {
        self.ensure_open()?;
        validate_key_component("exchange code", exchange).map_err(StoreError::from)?;
        let connection = self.manager.acquire()?;
        let day = date_param(date);
        let params: [&dyn ToSql; 2] = [&exchange, &day];
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM exchange_days WHERE exchange = ? AND date = CAST(? AS DATE)",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn load_day(&self, exchange: &str, date: NaiveDate) -> Result<ExchangeDailyQuote, WarehouseError> {
        self.ensure_open()?;
        validate_key_component("exchange code", exchange).map_err(StoreError::from)?;
        let connection = self.manager.acquire()?;
        // one snapshot across the four tables
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = read_day(&connection, exchange, date);
        let mut record = finalize_transaction(connection, result)?;
        self.intercept(&mut record);
        Ok(record)
    }

    fn save_day(
        &self,
        exchange: &str,
        date: NaiveDate,
        record: &ExchangeDailyQuote,
    ) -> Result<(), WarehouseError> {
        self.ensure_open()?;
        check_save_request(exchange, date, record)?;

        let _guard = self.save_lock.lock().expect("duckdb store save lock poisoned");
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            write_day(&connection, record)?;
            let mut read_back = read_day(&connection, exchange, date)?;
            self.intercept(&mut read_back);
            verify_read_back(record, &read_back)?;
            Ok(())
        })();

        if let Err(WarehouseError::Store(error)) = &result {
            if error.is_validation() {
                warn!(exchange, %date, %error, "read-back failed, rolling back");
            }
        }
        finalize_transaction(connection, result)?;
        debug!(exchange, %date, quotes = record.quotes.len(), "saved to duckdb store");
        Ok(())
    }
}

impl Store for DuckDbStore {
    fn exists(&self, exchange: &str, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.exists_day(exchange, date)?)
    }

    fn save(
        &self,
        exchange: &str,
        date: NaiveDate,
        record: &ExchangeDailyQuote,
    ) -> Result<(), StoreError> {
        Ok(self.save_day(exchange, date, record)?)
    }

    fn load(&self, exchange: &str, date: NaiveDate) -> Result<ExchangeDailyQuote, StoreError> {
        Ok(self.load_day(exchange, date)?)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        self.manager.drain();
        Ok(())
    }
}

/// Commit on success, roll back on failure.
///
/// A connection whose transaction could not be closed is dropped, never pooled.
fn finalize_transaction<T>(
    connection: PooledConnection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => match connection.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(error) => {
                connection.discard();
                Err(error.into())
            }
        },
        Err(error) => {
            if let Err(rollback_error) = connection.execute_batch("ROLLBACK") {
                warn!(error = %rollback_error, "rollback failed, discarding connection");
                connection.discard();
            }
            Err(error)
        }
    }
}

fn date_param(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn write_day(connection: &Connection, record: &ExchangeDailyQuote) -> Result<(), WarehouseError> {
    let exchange = record.exchange.as_str();
    let day = date_param(record.date);
    let key: [&dyn ToSql; 2] = [&exchange, &day];

    for table in DAY_TABLES {
        let delete_sql =
            format!("DELETE FROM {table} WHERE exchange = ? AND date = CAST(? AS DATE)");
        connection.execute(delete_sql.as_str(), key.as_slice())?;
    }

    let version = i32::from(record.version);
    let params: [&dyn ToSql; 3] = [&exchange, &day, &version];
    connection.execute(
        "INSERT INTO exchange_days (exchange, date, version) VALUES (?, CAST(? AS DATE), ?)",
        params.as_slice(),
    )?;

    let mut insert_company = connection.prepare(
        "INSERT INTO day_companies (exchange, date, code, name) VALUES (?, CAST(? AS DATE), ?, ?)",
    )?;
    for (code, company) in &record.companies {
        let params: [&dyn ToSql; 4] = [&exchange, &day, code, &company.name];
        insert_company.execute(params.as_slice())?;
    }

    let mut insert_events = connection.prepare(
        "INSERT INTO company_events \
         (exchange, date, code, name, dividend_ts, dividend_amount, split_ts, split_numerator, split_denominator) \
         VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?)",
    )?;
    let mut insert_bar = connection.prepare(
        "INSERT INTO quote_bars \
         (exchange, date, code, segment, seq, ts, open, close, high, low, volume) \
         VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (code, quote) in &record.quotes {
        let dividend_ts = quote.dividend.map(|dividend| dividend.timestamp);
        let dividend_amount = quote.dividend.map(|dividend| f64::from(dividend.amount));
        let split_ts = quote.split.map(|split| split.timestamp);
        let split_numerator = quote.split.map(|split| f64::from(split.numerator));
        let split_denominator = quote.split.map(|split| f64::from(split.denominator));
        let params: [&dyn ToSql; 9] = [
            &exchange,
            &day,
            code,
            &quote.company.name,
            &dividend_ts,
            &dividend_amount,
            &split_ts,
            &split_numerator,
            &split_denominator,
        ];
        insert_events.execute(params.as_slice())?;

        for kind in SerialKind::ALL {
            let segment = kind.as_str();
            for (index, bar) in quote.serial(kind).iter().enumerate() {
                let seq = i32::try_from(index).map_err(|_| {
                    WarehouseError::Corrupt(format!("{code} {segment} has more than i32::MAX bars"))
                })?;
                let open = f64::from(bar.open);
                let close = f64::from(bar.close);
                let high = f64::from(bar.high);
                let low = f64::from(bar.low);
                let params: [&dyn ToSql; 11] = [
                    &exchange,
                    &day,
                    code,
                    &segment,
                    &seq,
                    &bar.timestamp,
                    &open,
                    &close,
                    &high,
                    &low,
                    &bar.volume,
                ];
                insert_bar.execute(params.as_slice())?;
            }
        }
    }

    Ok(())
}

fn read_day(
    connection: &Connection,
    exchange: &str,
    date: NaiveDate,
) -> Result<ExchangeDailyQuote, WarehouseError> {
    let day = date_param(date);
    let key: [&dyn ToSql; 2] = [&exchange, &day];

    let version = {
        let mut statement = connection.prepare(
            "SELECT version FROM exchange_days WHERE exchange = ? AND date = CAST(? AS DATE)",
        )?;
        let mut rows = statement.query(key.as_slice())?;
        let Some(row) = rows.next()? else {
            return Err(StoreError::NotFound {
                exchange: exchange.to_owned(),
                date,
            }
            .into());
        };
        row.get::<_, i32>(0)?
    };
    let version = u8::try_from(version)
        .map_err(|_| WarehouseError::Corrupt(format!("version {version} out of range")))?;
    if version != CURRENT_VERSION {
        return Err(StoreError::from(CodecError::UnsupportedVersion {
            found: version,
            expected: CURRENT_VERSION,
        })
        .into());
    }

    let mut record = ExchangeDailyQuote::new(exchange, date);
    record.version = version;

    let mut statement = connection.prepare(
        "SELECT code, name FROM day_companies \
         WHERE exchange = ? AND date = CAST(? AS DATE) ORDER BY code",
    )?;
    let mut rows = statement.query(key.as_slice())?;
    while let Some(row) = rows.next()? {
        let code: String = row.get(0)?;
        let name: String = row.get(1)?;
        record
            .companies
            .insert(code.clone(), Company::new(code, name));
    }

    let mut statement = connection.prepare(
        "SELECT code, name, dividend_ts, dividend_amount, split_ts, split_numerator, split_denominator \
         FROM company_events WHERE exchange = ? AND date = CAST(? AS DATE) ORDER BY code",
    )?;
    let mut rows = statement.query(key.as_slice())?;
    while let Some(row) = rows.next()? {
        let code: String = row.get(0)?;
        let name: String = row.get(1)?;
        let dividend_ts: Option<u64> = row.get(2)?;
        let dividend_amount: Option<f64> = row.get(3)?;
        let split_ts: Option<u64> = row.get(4)?;
        let split_numerator: Option<f64> = row.get(5)?;
        let split_denominator: Option<f64> = row.get(6)?;

        let mut quote = CompanyDailyQuote::new(Company::new(code.clone(), name));
        quote.dividend = dividend_ts
            .zip(dividend_amount)
            .map(|(timestamp, amount)| Dividend {
                timestamp,
                amount: amount as f32,
            });
        quote.split = split_ts
            .zip(split_numerator)
            .zip(split_denominator)
            .map(|((timestamp, numerator), denominator)| Split {
                timestamp,
                numerator: numerator as f32,
                denominator: denominator as f32,
            });
        record.quotes.insert(code, quote);
    }

    let mut statement = connection.prepare(
        "SELECT code, segment, ts, open, close, high, low, volume FROM quote_bars \
         WHERE exchange = ? AND date = CAST(? AS DATE) ORDER BY code, segment, seq",
    )?;
    let mut rows = statement.query(key.as_slice())?;
    while let Some(row) = rows.next()? {
        let code: String = row.get(0)?;
        let segment: String = row.get(1)?;
        let kind: SerialKind = segment
            .parse()
            .map_err(WarehouseError::Corrupt)?;
        let Some(quote) = record.quotes.get_mut(&code) else {
            return Err(WarehouseError::Corrupt(format!(
                "bars for {code} have no company_events row"
            )));
        };
        quote.serial_mut(kind).push(Quote {
            timestamp: row.get(2)?,
            open: row.get::<_, f64>(3)? as f32,
            close: row.get::<_, f64>(4)? as f32,
            high: row.get::<_, f64>(5)? as f32,
            low: row.get::<_, f64>(6)? as f32,
            volume: row.get(7)?,
        });
    }

    Ok(record)
}
