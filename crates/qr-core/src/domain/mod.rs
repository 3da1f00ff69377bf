//! Quote record model.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Company`] | tradable symbol identity within one exchange |
//! | [`Quote`] | one OHLCV minute bar |
//! | [`Serial`] | ordered bars for one session segment |
//! | [`Dividend`] / [`Split`] | optional corporate action of the day |
//! | [`CompanyDailyQuote`] | one company's day: events plus pre/regular/post serials |
//! | [`ExchangeDailyQuote`] | the unit of persistence, keyed by exchange and date |

mod company;
mod daily;
mod events;
mod quote;
mod serial;

pub use company::Company;
pub use daily::{CompanyDailyQuote, ExchangeDailyQuote, CURRENT_VERSION};
pub use events::{Dividend, Split};
pub use quote::Quote;
pub use serial::{Serial, SerialKind};

use std::fmt::Display;

use crate::error::Mismatch;

/// Deep structural comparison that explains the first difference.
pub trait Equal {
    fn equal(&self, other: &Self) -> Result<(), Mismatch>;
}

impl<T: Equal> Equal for Option<T> {
    fn equal(&self, other: &Self) -> Result<(), Mismatch> {
        match (self, other) {
            (None, None) => Ok(()),
            (Some(left), Some(right)) => left.equal(right),
            (Some(_), None) => Err(Mismatch::new("present != absent")),
            (None, Some(_)) => Err(Mismatch::new("absent != present")),
        }
    }
}

pub(crate) fn compare<T: PartialEq + Display>(field: &str, left: &T, right: &T) -> Result<(), Mismatch> {
    if left == right {
        Ok(())
    } else {
        Err(Mismatch::field(field, format!("{left} != {right}")))
    }
}

/// Prices compare bitwise so a NaN or signed zero survives validation exactly as stored.
pub(crate) fn compare_f32(field: &str, left: f32, right: f32) -> Result<(), Mismatch> {
    if left.to_bits() == right.to_bits() {
        Ok(())
    } else {
        Err(Mismatch::field(field, format!("{left} != {right}")))
    }
}
