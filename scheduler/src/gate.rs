//! Determines whether a source may be polled at a given instant.
//
//  This module is deliberately pure: no async, no IO, no clock.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use market::SourceCategory;

use crate::types::{ScheduledSource, SourceSpec};

/// Result of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Category has no trading schedule.
    AlwaysOpen,
    /// Inside the configured trading window.
    Open,
    NotTradingDay,
    Holiday,
    OutsideHours,
}

impl GateDecision {
    pub fn is_open(&self) -> bool {
        matches!(self, GateDecision::AlwaysOpen | GateDecision::Open)
    }
}

/// Trading schedule of one exchange, in its local civil time.
///
/// The window is half-open, `[open, close)`: the opening minute belongs to the
/// session, the closing minute does not, so a boundary tick is never counted on
/// both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketHours {
    pub utc_offset: FixedOffset,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub trading_days: Vec<Weekday>,
    /// Local dates on which the exchange is closed regardless of weekday.
    pub holidays: Vec<NaiveDate>,
}

impl MarketHours {
    /// Tehran Stock Exchange: UTC+03:30, 08:30–12:45, Saturday through Wednesday.
    pub fn tehran_exchange() -> Self {
        Self {
            utc_offset: FixedOffset::east_opt(3 * 3600 + 30 * 60).expect("valid offset"),
            open: NaiveTime::from_hms_opt(8, 30, 0).expect("valid time"),
            close: NaiveTime::from_hms_opt(12, 45, 0).expect("valid time"),
            trading_days: vec![
                Weekday::Sat,
                Weekday::Sun,
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
            ],
            holidays: Vec::new(),
        }
    }

    pub fn check(&self, instant: DateTime<Utc>) -> GateDecision {
        let local = instant.with_timezone(&self.utc_offset);

        if !self.trading_days.contains(&local.weekday()) {
            return GateDecision::NotTradingDay;
        }

        if self.holidays.contains(&local.date_naive()) {
            return GateDecision::Holiday;
        }

        let t = local.time();
        if t >= self.open && t < self.close {
            GateDecision::Open
        } else {
            GateDecision::OutsideHours
        }
    }
}

/// Market-hours gate over every configured category.
///
/// Categories without a schedule are always pollable.
#[derive(Debug, Clone, Default)]
pub struct MarketHoursGate {
    schedules: HashMap<SourceCategory, MarketHours>,
}

impl MarketHoursGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedule(mut self, category: SourceCategory, hours: MarketHours) -> Self {
        self.schedules.insert(category, hours);
        self
    }

    pub fn is_gated(&self, category: SourceCategory) -> bool {
        self.schedules.contains_key(&category)
    }

    pub fn check(&self, category: SourceCategory, instant: DateTime<Utc>) -> GateDecision {
        match self.schedules.get(&category) {
            Some(hours) => hours.check(instant),
            None => GateDecision::AlwaysOpen,
        }
    }

    pub fn is_open(&self, category: SourceCategory, instant: DateTime<Utc>) -> bool {
        self.check(category, instant).is_open()
    }

    /// Pairs every source with its decision at `instant`, keeping input order.
    pub fn schedule<'a>(
        &self,
        specs: impl IntoIterator<Item = &'a SourceSpec>,
        instant: DateTime<Utc>,
    ) -> Vec<ScheduledSource<'a>> {
        specs
            .into_iter()
            .map(|spec| ScheduledSource {
                spec,
                decision: self.check(spec.category(), instant),
            })
            .collect()
    }
}
