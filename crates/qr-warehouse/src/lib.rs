//! # Quote Recorder Warehouse
//!
//! Store backends for daily exchange records, selected by a descriptor string.
//!
//! | Descriptor | Backend |
//! |------------|---------|
//! | `memory` | [`MemoryStore`], ordered in-memory key-value map |
//! | `fs\|{root}` | [`FileSystemStore`], gzip blob at `{root}/{yyyy}/{mm}/{dd}/{exchange}` |
//! | `duckdb\|{path}` | [`DuckDbStore`], typed tables with versioned migrations |
//!
//! Every backend implements [`qr_core::store::Store`]: a save writes, reads
//! back, compares, and undoes the write when the read-back differs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use qr_core::domain::ExchangeDailyQuote;
//! use qr_warehouse::open_store;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = open_store("fs|/var/lib/qr")?;
//!     let date = NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid date");
//!
//!     store.save("Nasdaq", date, &ExchangeDailyQuote::new("Nasdaq", date))?;
//!     assert!(store.exists("Nasdaq", date)?);
//!     Ok(())
//! }
//! ```

pub mod duckdb;
pub mod duckdb_store;
pub mod filesystem;
pub mod keys;
pub mod memory;
pub mod migrations;

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use qr_core::store::{ReadInterceptor, Store, StoreError};
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};
pub use duckdb_store::DuckDbStore;
pub use filesystem::FileSystemStore;
pub use memory::MemoryStore;

/// Errors raised inside the SQL backend before they are mapped to [`StoreError`].
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored rows do not form a valid record.
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

impl From<WarehouseError> for StoreError {
    fn from(error: WarehouseError) -> Self {
        match error {
            WarehouseError::Store(error) => error,
            WarehouseError::Io(error) => Self::Io(error),
            WarehouseError::DuckDb(error) => Self::Backend(error.to_string()),
            WarehouseError::Corrupt(message) => Self::Backend(message),
        }
    }
}

/// Parsed form of a `{kind}|{param}` store descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreDescriptor {
    Memory,
    FileSystem { root: PathBuf },
    DuckDb { path: PathBuf },
}

impl StoreDescriptor {
    /// Instantiate the backend this descriptor names.
    pub fn open(&self) -> Result<Arc<dyn Store>, StoreError> {
        self.open_with(None)
    }

    /// Instantiate the backend with a hook applied to every read-back value.
    pub fn open_with(
        &self,
        read_interceptor: Option<ReadInterceptor>,
    ) -> Result<Arc<dyn Store>, StoreError> {
        let store: Arc<dyn Store> = match self {
            Self::Memory => {
                let store = MemoryStore::new();
                Arc::new(match read_interceptor {
                    Some(hook) => store.with_read_interceptor(hook),
                    None => store,
                })
            }
            Self::FileSystem { root } => {
                let store = FileSystemStore::open(root.clone())?;
                Arc::new(match read_interceptor {
                    Some(hook) => store.with_read_interceptor(hook),
                    None => store,
                })
            }
            Self::DuckDb { path } => {
                let store = DuckDbStore::open(path.clone())?;
                Arc::new(match read_interceptor {
                    Some(hook) => store.with_read_interceptor(hook),
                    None => store,
                })
            }
        };
        Ok(store)
    }
}

impl FromStr for StoreDescriptor {
    type Err = StoreError;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| StoreError::InvalidDescriptor {
            descriptor: descriptor.to_owned(),
            reason: reason.to_owned(),
        };

        let mut parts = descriptor.trim().splitn(2, '|');
        let kind = parts.next().unwrap_or_default().trim();
        let param = parts.next().map(str::trim);

        match (kind, param) {
            ("memory", None) => Ok(Self::Memory),
            ("memory", Some(_)) => Err(invalid("the memory store takes no parameter")),
            ("fs", Some(root)) if !root.is_empty() => Ok(Self::FileSystem {
                root: PathBuf::from(root),
            }),
            ("duckdb", Some(path)) if !path.is_empty() => Ok(Self::DuckDb {
                path: PathBuf::from(path),
            }),
            ("fs" | "duckdb", _) => Err(invalid("missing path parameter")),
            ("", _) => Err(invalid("empty descriptor")),
            (other, _) => Err(invalid(&format!(
                "unknown store kind '{other}', expected memory, fs or duckdb"
            ))),
        }
    }
}

impl Display for StoreDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::FileSystem { root } => write!(f, "fs|{}", root.display()),
            Self::DuckDb { path } => write!(f, "duckdb|{}", path.display()),
        }
    }
}

/// Resolve a descriptor string to a ready backend.
pub fn open_store(descriptor: &str) -> Result<Arc<dyn Store>, StoreError> {
    descriptor.parse::<StoreDescriptor>()?.open()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_parse_to_backends() {
        assert_eq!("memory".parse::<StoreDescriptor>().expect("memory"), StoreDescriptor::Memory);
        assert_eq!(
            "fs|/var/lib/qr".parse::<StoreDescriptor>().expect("fs"),
            StoreDescriptor::FileSystem {
                root: PathBuf::from("/var/lib/qr")
            }
        );
        assert_eq!(
            " duckdb | quotes.duckdb ".parse::<StoreDescriptor>().expect("duckdb"),
            StoreDescriptor::DuckDb {
                path: PathBuf::from("quotes.duckdb")
            }
        );
    }

    #[test]
    fn malformed_descriptors_are_configuration_errors() {
        for descriptor in ["", "fs", "fs|", "duckdb| ", "redis|localhost", "memory|x"] {
            let error = descriptor
                .parse::<StoreDescriptor>()
                .expect_err(descriptor);
            assert!(
                matches!(error, StoreError::InvalidDescriptor { .. }),
                "{descriptor}: {error}"
            );
        }
    }

    #[test]
    fn descriptor_display_round_trips() {
        let descriptor = StoreDescriptor::FileSystem {
            root: PathBuf::from("/data/quotes"),
        };
        assert_eq!(
            descriptor.to_string().parse::<StoreDescriptor>().expect("parse"),
            descriptor
        );
    }

    #[test]
    fn open_store_resolves_memory() {
        let store = open_store("memory").expect("memory store");
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 15).expect("date");
        assert!(!store.exists("Nasdaq", date).expect("exists"));
    }
}
