//! Compact duration strings used for windows, timeouts and backoff.
//!
//! Accepted form: an unsigned integer followed by one unit, e.g. `500ms`,
//! `15s`, `30m`, `12h`, `3d`, `1w`.

use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowParseError {
    #[error("empty duration")]
    Empty,

    #[error("missing numeric value in '{0}'")]
    MissingValue(String),

    #[error("unknown unit '{unit}' in '{input}'")]
    UnknownUnit { input: String, unit: String },

    #[error("duration '{0}' is out of range")]
    OutOfRange(String),
}

fn split(input: &str) -> Result<(u64, &str), WindowParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(WindowParseError::Empty);
    }

    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if digits_end == 0 {
        return Err(WindowParseError::MissingValue(input.to_string()));
    }

    let value: u64 = s[..digits_end]
        .parse()
        .map_err(|_| WindowParseError::OutOfRange(input.to_string()))?;

    Ok((value, s[digits_end..].trim()))
}

fn to_millis(input: &str) -> Result<u64, WindowParseError> {
    let (value, unit) = split(input)?;

    let factor: u64 = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        other => {
            return Err(WindowParseError::UnknownUnit {
                input: input.to_string(),
                unit: other.to_string(),
            });
        }
    };

    value
        .checked_mul(factor)
        .ok_or_else(|| WindowParseError::OutOfRange(input.to_string()))
}

/// Parses an aggregation/retention window.
pub fn parse_window(input: &str) -> Result<TimeDelta, WindowParseError> {
    let ms = to_millis(input)?;
    let ms = i64::try_from(ms).map_err(|_| WindowParseError::OutOfRange(input.to_string()))?;
    TimeDelta::try_milliseconds(ms).ok_or_else(|| WindowParseError::OutOfRange(input.to_string()))
}

/// Parses a timeout or backoff delay.
pub fn parse_std_duration(input: &str) -> Result<Duration, WindowParseError> {
    to_millis(input).map(Duration::from_millis)
}
