use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Upstream family a source belongs to.
///
/// Each category has its own response shape; the adapters crate maps every
/// shape onto the same normalized [`Observation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Gold,
    Currency,
    Crypto,
    Commodity,
    Stock,
}

impl SourceCategory {
    pub const ALL: [SourceCategory; 5] = [
        SourceCategory::Gold,
        SourceCategory::Currency,
        SourceCategory::Crypto,
        SourceCategory::Commodity,
        SourceCategory::Stock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Gold => "gold",
            SourceCategory::Currency => "currency",
            SourceCategory::Crypto => "crypto",
            SourceCategory::Commodity => "commodity",
            SourceCategory::Stock => "stock",
        }
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown source category '{s}'"))
    }
}

/// Optional descriptive fields carried alongside a price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One raw price sample for a symbol from one source.
///
/// Immutable once recorded; only retention purge removes it from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub source_id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,

    #[serde(default)]
    pub metadata: ObservationMeta,
}

impl Observation {
    pub fn new(
        source_id: impl Into<String>,
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        price: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            symbol: symbol.into(),
            timestamp,
            price,
            metadata: ObservationMeta::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.metadata.unit = Some(unit.into());
        self
    }
}

/// Median price summary for one symbol over one trailing window.
///
/// Regenerated from the raw history on every run; never merged with an
/// earlier bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub symbol: String,
    pub interval_label: String,
    pub median_price: f64,
    pub sample_count: usize,
    pub computed_at: DateTime<Utc>,
}

/// A named trailing lookback window, e.g. `"24h"` → 1 day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationInterval {
    pub label: String,
    pub window: TimeDelta,
}

impl AggregationInterval {
    pub fn new(label: impl Into<String>, window: TimeDelta) -> Self {
        Self {
            label: label.into(),
            window,
        }
    }
}

/// How much raw history a source must keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_window: TimeDelta,
}

impl RetentionPolicy {
    pub fn new(max_window: TimeDelta) -> Self {
        Self { max_window }
    }

    /// Smallest retention that still covers every interval.
    pub fn covering(intervals: &[AggregationInterval]) -> Option<Self> {
        intervals.iter().map(|i| i.window).max().map(Self::new)
    }

    /// Observations strictly older than this instant may be purged.
    ///
    /// Saturates at the earliest representable instant, so nothing is purged.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.max_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn category_round_trips_through_str() {
        for c in SourceCategory::ALL {
            assert_eq!(c.as_str().parse::<SourceCategory>().unwrap(), c);
        }
        assert_eq!("Stock".parse::<SourceCategory>().unwrap(), SourceCategory::Stock);
        assert!("bonds".parse::<SourceCategory>().is_err());
    }

    #[test]
    fn covering_retention_uses_longest_window() {
        let intervals = vec![
            AggregationInterval::new("12h", TimeDelta::hours(12)),
            AggregationInterval::new("7d", TimeDelta::days(7)),
            AggregationInterval::new("24h", TimeDelta::days(1)),
        ];

        let policy = RetentionPolicy::covering(&intervals).unwrap();
        assert_eq!(policy.max_window, TimeDelta::days(7));
        assert!(RetentionPolicy::covering(&[]).is_none());
    }

    #[test]
    fn cutoff_subtracts_window() {
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        let policy = RetentionPolicy::new(TimeDelta::days(7));
        assert_eq!(
            policy.cutoff(now),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn cutoff_saturates_for_windows_beyond_the_calendar() {
        let now = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        let policy = RetentionPolicy::new(TimeDelta::days(100_000_000));
        assert_eq!(policy.cutoff(now), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn metadata_is_omitted_when_empty() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let obs = Observation::new("gold", "IR_GOLD_18K", ts, 10.0);

        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["metadata"], serde_json::json!({}));

        let named = obs.with_name("Gold 18k").with_unit("toman");
        let json = serde_json::to_value(&named).unwrap();
        assert_eq!(json["metadata"]["name"], "Gold 18k");
        assert_eq!(json["metadata"]["unit"], "toman");
    }
}
