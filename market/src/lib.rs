//! Domain model for market price ingestion.
//!
//! Everything in this crate is pure: observation and bucket types, duration
//! parsing for lookback windows, and the median aggregation engine. No I/O and
//! no clock; callers pass `now` explicitly.

pub mod aggregate;
pub mod types;
pub mod window;

pub use aggregate::{aggregate, aggregate_all, median};
pub use types::*;
pub use window::{WindowParseError, parse_std_duration, parse_window};
