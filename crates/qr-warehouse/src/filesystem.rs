//! Compressed blob per exchange and day under a date-partitioned tree.
//!
//! Layout: `{root}/{yyyy}/{mm}/{dd}/{exchange}`, each file holding the encoded
//! record gzip-compressed at the best compression level.
//!
//! A save writes `{exchange}.tmp`, verifies that staged file, and only then
//! renames it over the live file. Readers see the old record or the new one,
//! never a record that is later rolled back.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{Datelike, NaiveDate};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use qr_core::codec::{Decode, Encode};
use qr_core::domain::ExchangeDailyQuote;
use qr_core::error::validate_key_component;
use qr_core::store::{check_save_request, verify_read_back, ReadInterceptor, Store, StoreError};
use tracing::{debug, warn};

pub struct FileSystemStore {
    root: PathBuf,
    save_lock: Mutex<()>,
    read_interceptor: Option<ReadInterceptor>,
    closed: AtomicBool,
}

impl FileSystemStore {
    /// Open a store rooted at `root`, creating the directory when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            save_lock: Mutex::new(()),
            read_interceptor: None,
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_read_interceptor(mut self, interceptor: ReadInterceptor) -> Self {
        self.read_interceptor = Some(interceptor);
        self
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// File holding the record of `exchange` on `date`.
    pub fn record_path(&self, exchange: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(exchange)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn read_record(
        &self,
        path: &Path,
        exchange: &str,
        date: NaiveDate,
    ) -> Result<ExchangeDailyQuote, StoreError> {
        let compressed = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    exchange: exchange.to_owned(),
                    date,
                })
            }
            Err(error) => return Err(error.into()),
        };

        let mut bytes = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut bytes)?;
        let mut record = ExchangeDailyQuote::from_bytes(&bytes)?;
        if record.exchange != exchange || record.date != date {
            return Err(StoreError::KeyMismatch {
                exchange: exchange.to_owned(),
                date,
                actual_exchange: record.exchange,
                actual_date: record.date,
            });
        }

        if let Some(interceptor) = &self.read_interceptor {
            interceptor(&mut record);
        }
        Ok(record)
    }
}

fn compress(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(extension);
    path.with_file_name(name)
}

impl Store for FileSystemStore {
    fn exists(&self, exchange: &str, date: NaiveDate) -> Result<bool, StoreError> {
        self.ensure_open()?;
        validate_key_component("exchange code", exchange)?;
        let path = self.record_path(exchange, date);
        Ok(path.try_exists()? && path.is_file())
    }

    fn save(
        &self,
        exchange: &str,
        date: NaiveDate,
        record: &ExchangeDailyQuote,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        check_save_request(exchange, date, record)?;
        let blob = compress(&record.to_bytes()?)?;

        let _guard = self.save_lock.lock().expect("filesystem store save lock poisoned");
        let path = self.record_path(exchange, date);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = sibling(&path, ".tmp");
        fs::write(&staging, &blob)?;

        let verified = self
            .read_record(&staging, exchange, date)
            .and_then(|read_back| verify_read_back(record, &read_back));
        match verified {
            Ok(()) => {
                fs::rename(&staging, &path)?;
                debug!(path = %path.display(), bytes = blob.len(), "saved record file");
                Ok(())
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "read-back of staged file failed, discarding it");
                fs::remove_file(&staging)?;
                Err(error)
            }
        }
    }

    fn load(&self, exchange: &str, date: NaiveDate) -> Result<ExchangeDailyQuote, StoreError> {
        self.ensure_open()?;
        validate_key_component("exchange code", exchange)?;
        self.read_record(&self.record_path(exchange, date), exchange, date)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use qr_core::domain::{Company, CompanyDailyQuote, Quote, Serial};
    use tempfile::tempdir;

    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).expect("date")
    }

    fn record() -> ExchangeDailyQuote {
        let mut record = ExchangeDailyQuote::new("Sse", date());
        let company = Company::new("600000.SS", "Pudong Development Bank");
        let mut quote = CompanyDailyQuote::new(company.clone());
        quote.regular = Serial::from(vec![Quote {
            timestamp: 1_709_602_200,
            open: 7.1,
            close: 7.15,
            high: 7.2,
            low: 7.05,
            volume: 88_000,
        }]);
        record.insert(company, Some(quote));
        record
    }

    #[test]
    fn record_lands_in_date_partitioned_path() {
        let temp = tempdir().expect("tempdir");
        let store = FileSystemStore::open(temp.path().join("quotes")).expect("store");

        store.save("Sse", date(), &record()).expect("save");

        let expected = temp.path().join("quotes/2024/03/05/Sse");
        assert!(expected.is_file());
        assert!(!sibling(&expected, ".tmp").exists());

        let mut header = [0_u8; 2];
        fs::File::open(&expected)
            .and_then(|mut file| file.read_exact(&mut header))
            .expect("read header");
        assert_eq!(header, [0x1f, 0x8b], "gzip magic");
    }

    #[test]
    fn rejected_overwrite_never_touches_the_live_file() {
        let temp = tempdir().expect("tempdir");
        let plain = FileSystemStore::open(temp.path()).expect("store");
        plain.save("Sse", date(), &record()).expect("seed");
        let seeded = fs::read(plain.record_path("Sse", date())).expect("seeded bytes");

        let tampering = FileSystemStore::open(temp.path())
            .expect("store")
            .with_read_interceptor(Arc::new(|record| record.companies.clear()));
        let mut changed = record();
        changed.insert(Company::new("600004.SS", "Baiyun Airport"), None);

        let error = tampering
            .save("Sse", date(), &changed)
            .expect_err("tampered read-back");

        assert!(error.is_validation());
        assert_eq!(
            fs::read(plain.record_path("Sse", date())).expect("live bytes"),
            seeded
        );
        assert!(!sibling(&plain.record_path("Sse", date()), ".tmp").exists());
        assert_eq!(plain.load("Sse", date()).expect("load"), record());
    }

    #[test]
    fn live_file_keeps_the_previous_record_while_the_new_one_is_verified() {
        let temp = tempdir().expect("tempdir");
        let plain = FileSystemStore::open(temp.path()).expect("store");
        plain.save("Sse", date(), &record()).expect("seed");
        let live = plain.record_path("Sse", date());
        let seeded = fs::read(&live).expect("seeded bytes");

        let observed = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&observed);
        let live_path = live.clone();
        let store = FileSystemStore::open(temp.path())
            .expect("store")
            .with_read_interceptor(Arc::new(move |_record: &mut ExchangeDailyQuote| {
                *seen.lock().expect("observed lock") = fs::read(&live_path).ok();
            }));
        let mut changed = record();
        changed.insert(Company::new("600004.SS", "Baiyun Airport"), None);

        store.save("Sse", date(), &changed).expect("save");

        assert_eq!(
            observed.lock().expect("observed lock").as_deref(),
            Some(seeded.as_slice())
        );
        assert_ne!(fs::read(&live).expect("live bytes"), seeded);
    }

    #[test]
    fn misplaced_file_is_reported_as_key_mismatch() {
        let temp = tempdir().expect("tempdir");
        let store = FileSystemStore::open(temp.path()).expect("store");
        store.save("Sse", date(), &record()).expect("save");

        let other_day = NaiveDate::from_ymd_opt(2024, 3, 6).expect("date");
        let target = store.record_path("Sse", other_day);
        fs::create_dir_all(target.parent().expect("parent")).expect("mkdir");
        fs::copy(store.record_path("Sse", date()), &target).expect("copy");

        assert!(matches!(
            store.load("Sse", other_day),
            Err(StoreError::KeyMismatch { .. })
        ));
    }
}
