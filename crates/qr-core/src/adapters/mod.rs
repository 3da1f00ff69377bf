//! Concrete collaborators: the Yahoo chart source and the company roster it crawls.

pub mod roster;
pub mod yahoo;

pub use roster::{Roster, RosterError};
pub use yahoo::{YahooSource, YAHOO_CHART_BASE_URL};
