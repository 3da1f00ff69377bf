//! Behavior tests for the Store contract.
//!
//! Every scenario runs against the memory, filesystem, and DuckDB backends
//! through their descriptors, so all three must agree on user-visible
//! outcomes: what exists, what loads, and what a failed save leaves behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use qr_core::domain::{
    Company, CompanyDailyQuote, Dividend, Equal, ExchangeDailyQuote, Quote, Split,
};
use qr_core::store::{ReadInterceptor, Store, StoreError};
use qr_warehouse::StoreDescriptor;
use tempfile::{tempdir, TempDir};

struct Backend {
    name: &'static str,
    store: Arc<dyn Store>,
    _dir: TempDir,
}

fn backends_with(interceptor: Option<ReadInterceptor>) -> Vec<Backend> {
    let memory_dir = tempdir().expect("tempdir");
    let fs_dir = tempdir().expect("tempdir");
    let duckdb_dir = tempdir().expect("tempdir");

    let descriptors = [
        ("memory", StoreDescriptor::Memory, memory_dir),
        (
            "fs",
            StoreDescriptor::FileSystem {
                root: fs_dir.path().join("quotes"),
            },
            fs_dir,
        ),
        (
            "duckdb",
            StoreDescriptor::DuckDb {
                path: duckdb_dir.path().join("quotes.duckdb"),
            },
            duckdb_dir,
        ),
    ];

    descriptors
        .into_iter()
        .map(|(name, descriptor, dir)| Backend {
            name,
            store: descriptor
                .open_with(interceptor.clone())
                .unwrap_or_else(|error| panic!("{name}: open failed: {error}")),
            _dir: dir,
        })
        .collect()
}

fn backends() -> Vec<Backend> {
    backends_with(None)
}

/// Backends whose read-back is corrupted while `armed` is set.
fn tampering_backends(armed: Arc<AtomicBool>) -> Vec<Backend> {
    let hook: ReadInterceptor = Arc::new(move |record: &mut ExchangeDailyQuote| {
        if !armed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(quote) = record.quotes.values_mut().next() {
            let mut bars = quote.regular.as_slice().to_vec();
            if let Some(first) = bars.first_mut() {
                first.close += 1.0;
            }
            quote.regular = bars.into();
        }
    });
    backends_with(Some(hook))
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).expect("date")
}

fn bar(timestamp: u64, open: f32, close: f32, volume: u64) -> Quote {
    Quote {
        timestamp,
        open,
        close,
        high: open.max(close) + 0.25,
        low: open.min(close) - 0.25,
        volume,
    }
}

fn trading_day(day: u32, close: f32) -> ExchangeDailyQuote {
    let mut record = ExchangeDailyQuote::new("Nasdaq", date(day));

    let apple = Company::new("AAPL", "Apple Inc.");
    let mut apple_day = CompanyDailyQuote::new(apple.clone());
    apple_day.dividend = Some(Dividend {
        timestamp: 1_710_509_400,
        amount: 0.25,
    });
    apple_day.pre.push(bar(1_710_496_800, 171.5, 172.0, 1_200));
    apple_day.regular.push(bar(1_710_509_400, 172.0, close, 45_000));
    apple_day.regular.push(bar(1_710_509_460, close, 173.5, 30_000));
    apple_day.post.push(bar(1_710_532_800, 173.5, 173.25, 900));
    record.insert(apple, Some(apple_day));

    let nvidia = Company::new("NVDA", "NVIDIA Corporation");
    let mut nvidia_day = CompanyDailyQuote::new(nvidia.clone());
    nvidia_day.split = Some(Split {
        timestamp: 1_710_509_400,
        numerator: 10.0,
        denominator: 1.0,
    });
    nvidia_day.regular.push(bar(1_710_509_400, 880.0, 884.5, 80_000));
    record.insert(nvidia, Some(nvidia_day));

    record.insert(Company::new("HALT", "Halted Holdings"), None);
    record
}

// =============================================================================
// Store: save, exists, load
// =============================================================================

#[test]
fn when_a_record_is_saved_then_every_backend_loads_an_equal_record() {
    for backend in backends() {
        // Given: a full trading day with events and all three segments
        let record = trading_day(15, 172.75);

        // When: the record is saved
        backend
            .store
            .save("Nasdaq", date(15), &record)
            .unwrap_or_else(|error| panic!("{}: save failed: {error}", backend.name));

        // Then: it exists and loads back structurally equal
        assert!(backend.store.exists("Nasdaq", date(15)).expect("exists"), "{}", backend.name);
        let loaded = backend.store.load("Nasdaq", date(15)).expect("load");
        if let Err(mismatch) = record.equal(&loaded) {
            panic!("{}: loaded record differs: {mismatch}", backend.name);
        }
        assert_eq!(loaded.companies.len(), 3, "{}", backend.name);
        assert_eq!(loaded.quotes.len(), 2, "{}", backend.name);
    }
}

#[test]
fn when_nothing_was_saved_then_exists_is_false_and_load_is_not_found() {
    for backend in backends() {
        // Given: a record for a different day
        backend
            .store
            .save("Nasdaq", date(15), &trading_day(15, 172.75))
            .expect("save");

        // When/Then: the neighbouring day and another exchange are absent
        assert!(!backend.store.exists("Nasdaq", date(14)).expect("exists"), "{}", backend.name);
        assert!(!backend.store.exists("Nyse", date(15)).expect("exists"), "{}", backend.name);
        assert!(
            matches!(
                backend.store.load("Nasdaq", date(14)),
                Err(StoreError::NotFound { .. })
            ),
            "{}",
            backend.name
        );
    }
}

#[test]
fn when_a_day_is_saved_twice_then_the_second_record_wins() {
    for backend in backends() {
        // Given: a stored day
        backend
            .store
            .save("Nasdaq", date(15), &trading_day(15, 172.75))
            .expect("first save");

        // When: the day is re-crawled with different values and fewer companies
        let mut second = ExchangeDailyQuote::new("Nasdaq", date(15));
        let apple = Company::new("AAPL", "Apple Inc.");
        let mut apple_day = CompanyDailyQuote::new(apple.clone());
        apple_day.regular.push(bar(1_710_509_400, 172.0, 174.0, 10));
        second.insert(apple, Some(apple_day));
        backend
            .store
            .save("Nasdaq", date(15), &second)
            .unwrap_or_else(|error| panic!("{}: overwrite failed: {error}", backend.name));

        // Then: only the second record is visible
        let loaded = backend.store.load("Nasdaq", date(15)).expect("load");
        if let Err(mismatch) = second.equal(&loaded) {
            panic!("{}: overwrite left stale data: {mismatch}", backend.name);
        }
        assert_eq!(loaded.companies.len(), 1, "{}", backend.name);
    }
}

#[test]
fn when_no_company_traded_then_the_stored_record_marks_a_non_trading_day() {
    for backend in backends() {
        // Given: a holiday where every company was considered but none traded
        let mut holiday = ExchangeDailyQuote::new("Nasdaq", date(29));
        holiday.insert(Company::new("AAPL", "Apple Inc."), None);
        holiday.insert(Company::new("MSFT", "Microsoft Corporation"), None);

        // When: it is saved
        backend.store.save("Nasdaq", date(29), &holiday).expect("save");

        // Then: the day counts as captured and keeps its roster
        assert!(backend.store.exists("Nasdaq", date(29)).expect("exists"), "{}", backend.name);
        let loaded = backend.store.load("Nasdaq", date(29)).expect("load");
        assert!(!loaded.is_trading_day(), "{}", backend.name);
        assert_eq!(loaded.companies.len(), 2, "{}", backend.name);
    }
}

// =============================================================================
// Store: write verification and rollback
// =============================================================================

#[test]
fn when_read_back_is_tampered_then_save_fails_and_nothing_is_visible() {
    let armed = Arc::new(AtomicBool::new(true));
    for backend in tampering_backends(Arc::clone(&armed)) {
        // Given: a backend whose read-back differs from what was written
        let record = trading_day(15, 172.75);

        // When: the record is saved
        let error = backend
            .store
            .save("Nasdaq", date(15), &record)
            .expect_err("tampered save must fail");

        // Then: validation fails and the write is undone
        assert!(error.is_validation(), "{}: {error}", backend.name);
        assert!(!backend.store.exists("Nasdaq", date(15)).expect("exists"), "{}", backend.name);
    }
}

#[test]
fn when_a_tampered_overwrite_is_rolled_back_then_the_previous_record_survives() {
    let armed = Arc::new(AtomicBool::new(false));
    for backend in tampering_backends(Arc::clone(&armed)) {
        // Given: a stored day written while verification was honest
        armed.store(false, Ordering::SeqCst);
        let original = trading_day(15, 172.75);
        backend.store.save("Nasdaq", date(15), &original).expect("first save");

        // When: an overwrite fails verification
        armed.store(true, Ordering::SeqCst);
        let error = backend
            .store
            .save("Nasdaq", date(15), &trading_day(15, 180.0))
            .expect_err("tampered overwrite must fail");
        armed.store(false, Ordering::SeqCst);

        // Then: the original record is still what loads
        assert!(error.is_validation(), "{}: {error}", backend.name);
        let loaded = backend.store.load("Nasdaq", date(15)).expect("load");
        if let Err(mismatch) = original.equal(&loaded) {
            panic!("{}: rollback lost the previous record: {mismatch}", backend.name);
        }
    }
}

// =============================================================================
// Store: concurrent access
// =============================================================================

#[test]
fn when_saves_race_then_every_key_loads_one_complete_record() {
    for backend in backends() {
        // Given: eight distinct days and two competing versions of the 20th
        let store = backend.store.as_ref();
        let days: Vec<u32> = (1..=8).collect();
        let candidates = [trading_day(20, 150.0), trading_day(20, 250.0)];
        let done = AtomicBool::new(false);

        // When: all of them are saved at once while a reader polls the 20th
        let (saves, overwrites, torn) = thread::scope(|scope| {
            let writers: Vec<_> = days
                .iter()
                .map(|&day| {
                    scope.spawn(move || {
                        store.save("Nasdaq", date(day), &trading_day(day, 170.0 + day as f32))
                    })
                })
                .collect();
            let overwriters: Vec<_> = candidates
                .iter()
                .map(|candidate| {
                    scope.spawn(move || {
                        (0..5).try_for_each(|_| store.save("Nasdaq", date(20), candidate))
                    })
                })
                .collect();
            let reader = scope.spawn(|| {
                let mut torn = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    match store.load("Nasdaq", date(20)) {
                        Ok(loaded)
                            if candidates
                                .iter()
                                .any(|candidate| candidate.equal(&loaded).is_ok()) => {}
                        Err(StoreError::NotFound { .. }) => {}
                        other => torn.push(format!("{other:?}")),
                    }
                }
                torn
            });

            let saves: Vec<_> = writers
                .into_iter()
                .map(|writer| writer.join().expect("writer thread"))
                .collect();
            let overwrites: Vec<_> = overwriters
                .into_iter()
                .map(|overwriter| overwriter.join().expect("overwriter thread"))
                .collect();
            done.store(true, Ordering::SeqCst);
            (saves, overwrites, reader.join().expect("reader thread"))
        });

        for result in saves.iter().chain(&overwrites) {
            if let Err(error) = result {
                panic!("{}: concurrent save failed: {error}", backend.name);
            }
        }
        assert!(torn.is_empty(), "{}: reader saw {torn:?}", backend.name);

        // Then: each distinct day is intact and the 20th is one whole version
        for &day in &days {
            let loaded = store.load("Nasdaq", date(day)).expect("load");
            if let Err(mismatch) = trading_day(day, 170.0 + day as f32).equal(&loaded) {
                panic!("{}: day {day} differs: {mismatch}", backend.name);
            }
        }
        let contested = store.load("Nasdaq", date(20)).expect("load");
        assert!(
            candidates.iter().any(|candidate| candidate.equal(&contested).is_ok()),
            "{}: the 20th matches neither version",
            backend.name
        );
    }
}

// =============================================================================
// Store: key handling
// =============================================================================

#[test]
fn when_the_key_does_not_match_the_record_then_save_is_rejected() {
    for backend in backends() {
        // Given: a record for the 15th
        let record = trading_day(15, 172.75);

        // When: it is saved under another date or a malformed exchange code
        let wrong_date = backend.store.save("Nasdaq", date(16), &record);
        let mut colon = record.clone();
        colon.exchange = String::from("Nas:daq");
        let reserved = backend.store.save("Nas:daq", date(15), &colon);

        // Then: nothing is written
        assert!(
            matches!(wrong_date, Err(StoreError::KeyMismatch { .. })),
            "{}: {wrong_date:?}",
            backend.name
        );
        assert!(
            matches!(reserved, Err(StoreError::InvalidKey(_))),
            "{}: {reserved:?}",
            backend.name
        );
        assert!(!backend.store.exists("Nasdaq", date(16)).expect("exists"), "{}", backend.name);
    }
}

#[test]
fn when_a_store_is_closed_then_later_calls_fail() {
    for backend in backends() {
        // Given: a closed store
        backend.store.close().expect("close");

        // When/Then: every operation reports the closed state
        assert!(
            matches!(
                backend.store.exists("Nasdaq", date(15)),
                Err(StoreError::Closed)
            ),
            "{}",
            backend.name
        );
        assert!(
            matches!(
                backend.store.save("Nasdaq", date(15), &trading_day(15, 172.75)),
                Err(StoreError::Closed)
            ),
            "{}",
            backend.name
        );
    }
}
