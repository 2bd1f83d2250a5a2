pub mod memory;
pub mod sqlite_store;

use chrono::{DateTime, Utc};
use market::{Observation, RetentionPolicy};

/// Per-source append-only log of observations.
///
/// Contract shared by every backend:
///   - `append` only adds; existing entries are never rewritten
///   - `snapshot` returns entries with `timestamp >= since` in insertion order,
///     as an owned copy unaffected by later appends
///   - `purge` removes exactly the entries with
///     `timestamp < now - retention.max_window` and is idempotent
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, source_id: &str, observations: &[Observation]) -> anyhow::Result<()>;

    async fn snapshot(
        &self,
        source_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Observation>>;

    /// Returns how many observations were removed.
    async fn purge(
        &self,
        source_id: &str,
        retention: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64>;

    /// Source ids that currently hold at least one observation.
    async fn sources(&self) -> anyhow::Result<Vec<String>>;
}
