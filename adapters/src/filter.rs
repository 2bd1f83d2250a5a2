use std::collections::HashSet;

use market::Observation;

/// Symbols or display names that must never reach the history.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    entries: HashSet<String>,
}

impl Blacklist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn blocks(&self, obs: &Observation) -> bool {
        self.entries.contains(&obs.symbol)
            || obs
                .metadata
                .name
                .as_ref()
                .is_some_and(|n| self.entries.contains(n))
    }

    /// Drops blacklisted observations, keeping order.
    pub fn retain(&self, mut observations: Vec<Observation>) -> Vec<Observation> {
        if !self.is_empty() {
            observations.retain(|o| !self.blocks(o));
        }
        observations
    }
}
