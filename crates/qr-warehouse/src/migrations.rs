use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// Day tables carry no unique constraints: a save replaces a whole day by
// deleting and re-inserting its rows inside one transaction.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_daily_records",
        sql: r#"
CREATE TABLE IF NOT EXISTS exchange_days (
    exchange TEXT NOT NULL,
    date DATE NOT NULL,
    version INTEGER NOT NULL,
    saved_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS day_companies (
    exchange TEXT NOT NULL,
    date DATE NOT NULL,
    code TEXT NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS company_events (
    exchange TEXT NOT NULL,
    date DATE NOT NULL,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    dividend_ts UBIGINT,
    dividend_amount DOUBLE,
    split_ts UBIGINT,
    split_numerator DOUBLE,
    split_denominator DOUBLE
);

CREATE TABLE IF NOT EXISTS quote_bars (
    exchange TEXT NOT NULL,
    date DATE NOT NULL,
    code TEXT NOT NULL,
    segment TEXT NOT NULL,
    seq INTEGER NOT NULL,
    ts UBIGINT NOT NULL,
    open DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    volume UBIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_exchange_days_key ON exchange_days(exchange, date);
CREATE INDEX IF NOT EXISTS idx_day_companies_key ON day_companies(exchange, date);
CREATE INDEX IF NOT EXISTS idx_company_events_key ON company_events(exchange, date);
CREATE INDEX IF NOT EXISTS idx_quote_bars_key ON quote_bars(exchange, date, code);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}
