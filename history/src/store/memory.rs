use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market::{Observation, RetentionPolicy};
use parking_lot::RwLock;

use super::HistoryStore;

/// Process-local history, used by tests and `--history memory` dry runs.
#[derive(Default)]
pub struct MemoryHistoryStore {
    logs: RwLock<HashMap<String, Vec<Observation>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total observations held for a source (test convenience).
    pub fn len(&self, source_id: &str) -> usize {
        self.logs.read().get(source_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, source_id: &str, observations: &[Observation]) -> anyhow::Result<()> {
        if observations.is_empty() {
            return Ok(());
        }

        let mut logs = self.logs.write();
        logs.entry(source_id.to_string())
            .or_default()
            .extend_from_slice(observations);

        Ok(())
    }

    async fn snapshot(
        &self,
        source_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Observation>> {
        let logs = self.logs.read();
        Ok(logs
            .get(source_id)
            .map(|log| log.iter().filter(|o| o.timestamp >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn purge(
        &self,
        source_id: &str,
        retention: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let cutoff = retention.cutoff(now);

        let mut logs = self.logs.write();
        let Some(log) = logs.get_mut(source_id) else {
            return Ok(0);
        };

        let before = log.len();
        log.retain(|o| o.timestamp >= cutoff);
        let removed = (before - log.len()) as u64;

        if log.is_empty() {
            logs.remove(source_id);
        }

        Ok(removed)
    }

    async fn sources(&self) -> anyhow::Result<Vec<String>> {
        let mut ids: Vec<String> = self.logs.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
