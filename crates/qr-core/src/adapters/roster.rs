//! Company rosters keyed by exchange code.
//!
//! The on-disk form is a JSON object mapping exchange code to companies:
//!
//! ```json
//! { "Nasdaq": [{ "code": "AAPL", "name": "Apple Inc." }] }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::domain::Company;
use crate::error::{validate_key_component, ValidationError};

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("roster is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("roster entry for {exchange} is invalid: {source}")]
    InvalidEntry {
        exchange: String,
        source: ValidationError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    exchanges: BTreeMap<String, Vec<Company>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| RosterError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RosterError> {
        let exchanges: BTreeMap<String, Vec<Company>> = serde_json::from_str(raw)?;
        let mut roster = Self::new();
        for (exchange, companies) in exchanges {
            roster.insert(exchange, companies)?;
        }
        Ok(roster)
    }

    /// Replace the roster of one exchange. Duplicate codes keep their first entry.
    pub fn insert(
        &mut self,
        exchange: impl Into<String>,
        companies: Vec<Company>,
    ) -> Result<(), RosterError> {
        let exchange = exchange.into();
        let mut seen = BTreeMap::new();
        for company in companies {
            validate_key_component("company code", &company.code).map_err(|source| {
                RosterError::InvalidEntry {
                    exchange: exchange.clone(),
                    source,
                }
            })?;
            seen.entry(company.code.clone()).or_insert(company);
        }
        self.exchanges
            .insert(exchange.to_ascii_lowercase(), seen.into_values().collect());
        Ok(())
    }

    /// Companies listed for the exchange; empty when the exchange is not listed.
    pub fn companies(&self, exchange: &str) -> Vec<Company> {
        self.exchanges
            .get(&exchange.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self, exchange: &str) -> usize {
        self.exchanges
            .get(&exchange.to_ascii_lowercase())
            .map_or(0, Vec::len)
    }
}
