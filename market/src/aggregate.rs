//! Median aggregation over trailing windows.
//
//  Deliberately pure: the only clock is the `now` argument.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::{AggregateBucket, AggregationInterval, Observation};

/// Median of a price set.
///
/// Odd count → middle element after an ascending sort; even count → mean of the
/// two central values. Returns `None` for an empty slice.
pub fn median(prices: &[f64]) -> Option<f64> {
    if prices.is_empty() {
        return None;
    }

    let mut sorted = prices.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Computes one bucket per symbol for observations inside `[now - window, now]`.
///
/// Symbols without samples in the window produce no bucket. Non-finite prices
/// are ignored. Buckets are ordered by symbol. A window reaching past the
/// earliest representable instant covers all of history.
pub fn aggregate(
    snapshot: &[Observation],
    interval_label: &str,
    window: TimeDelta,
    now: DateTime<Utc>,
) -> Vec<AggregateBucket> {
    let start = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut by_symbol: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for obs in snapshot {
        if obs.timestamp < start || obs.timestamp > now || !obs.price.is_finite() {
            continue;
        }
        by_symbol.entry(obs.symbol.as_str()).or_default().push(obs.price);
    }

    by_symbol
        .into_iter()
        .filter_map(|(symbol, prices)| {
            median(&prices).map(|median_price| AggregateBucket {
                symbol: symbol.to_string(),
                interval_label: interval_label.to_string(),
                median_price,
                sample_count: prices.len(),
                computed_at: now,
            })
        })
        .collect()
}

/// Runs [`aggregate`] independently for every interval over the same snapshot.
pub fn aggregate_all(
    snapshot: &[Observation],
    intervals: &[AggregationInterval],
    now: DateTime<Utc>,
) -> BTreeMap<String, Vec<AggregateBucket>> {
    intervals
        .iter()
        .map(|i| (i.label.clone(), aggregate(snapshot, &i.label, i.window, now)))
        .collect()
}
