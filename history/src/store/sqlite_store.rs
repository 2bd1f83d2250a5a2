//! SqliteHistoryStore
//! ------------------
//! SQLite-backed raw history. Each invocation of the engine is a fresh
//! process, so the history must outlive it: this backend is what lets a run
//! aggregate over observations appended by earlier runs.
//!
//!  - one table, one row per observation
//!  - insertion order is the autoincrement `seq`
//!  - timestamps are stored as UTC nanoseconds so purge cutoffs compare exactly
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market::{Observation, ObservationMeta, RetentionPolicy};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::HistoryStore;

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

fn to_nanos(ts: DateTime<Utc>) -> anyhow::Result<i64> {
    ts.timestamp_nanos_opt()
        .with_context(|| format!("timestamp {ts} outside storable range"))
}

fn row_to_observation(row: &SqliteRow) -> anyhow::Result<Observation> {
    Ok(Observation {
        source_id: row.try_get("source_id")?,
        symbol: row.try_get("symbol")?,
        timestamp: DateTime::from_timestamp_nanos(row.try_get::<i64, _>("ts_ns")?),
        price: row.try_get("price")?,
        metadata: ObservationMeta {
            unit: row.try_get("unit")?,
            name: row.try_get("name")?,
        },
    })
}

impl SqliteHistoryStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the database at `url` and ensures the schema.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid history url '{url}'"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open history database '{url}'"))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS observations (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  source_id TEXT NOT NULL,
  symbol TEXT NOT NULL,
  ts_ns BIGINT NOT NULL,
  price REAL NOT NULL,
  unit TEXT,
  name TEXT
);
"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_observations_source_ts ON observations(source_id, ts_ns);"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    /// Appends all observations in one transaction: either the whole poll is
    /// recorded or none of it.
    #[instrument(skip(self, observations), fields(count = observations.len()), level = "debug")]
    async fn append(&self, source_id: &str, observations: &[Observation]) -> anyhow::Result<()> {
        if observations.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for o in observations {
            sqlx::query(
                r#"
INSERT INTO observations (source_id, symbol, ts_ns, price, unit, name)
VALUES (?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(source_id)
            .bind(&o.symbol)
            .bind(to_nanos(o.timestamp)?)
            .bind(o.price)
            .bind(&o.metadata.unit)
            .bind(&o.metadata.name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn snapshot(
        &self,
        source_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Observation>> {
        let rows = sqlx::query(
            r#"
SELECT source_id, symbol, ts_ns, price, unit, name
FROM observations
WHERE source_id = ? AND ts_ns >= ?
ORDER BY seq ASC;
"#,
        )
        .bind(source_id)
        .bind(to_nanos(since)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_observation).collect()
    }

    #[instrument(skip(self, retention), level = "debug")]
    async fn purge(
        &self,
        source_id: &str,
        retention: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let cutoff = to_nanos(retention.cutoff(now))?;

        let removed = sqlx::query("DELETE FROM observations WHERE source_id = ? AND ts_ns < ?")
            .bind(source_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        debug!(removed, "purged raw history");
        Ok(removed)
    }

    async fn sources(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT source_id FROM observations ORDER BY source_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("source_id").map_err(Into::into))
            .collect()
    }
}
