//! Shared types used by the fetch path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use adapters::{FetchError, SourceFetcher};
use market::{Observation, SourceCategory};

use crate::gate::GateDecision;
use crate::retry::RetryPolicy;

/// One configured source: its fetcher plus per-source timing knobs.
#[derive(Clone)]
pub struct SourceSpec {
    pub fetcher: Arc<dyn SourceFetcher>,

    /// Applied to every individual attempt, not to the whole retry sequence.
    pub timeout: Duration,

    pub retry: RetryPolicy,
}

impl SourceSpec {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            timeout,
            retry,
        }
    }

    pub fn source_id(&self) -> &str {
        self.fetcher.source_id()
    }

    pub fn category(&self) -> SourceCategory {
        self.fetcher.category()
    }
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSpec")
            .field("source_id", &self.source_id())
            .field("category", &self.category())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// A source paired with the gate's verdict for this run.
#[derive(Debug, Clone)]
pub struct ScheduledSource<'a> {
    pub spec: &'a SourceSpec,
    pub decision: GateDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    Failure,
    SkippedByGate,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Success => "success",
            SourceStatus::Failure => "failure",
            SourceStatus::SkippedByGate => "skipped_by_gate",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one source within one run.
#[derive(Debug, Clone)]
pub struct SourceRunResult {
    pub source_id: String,
    pub category: SourceCategory,
    pub status: SourceStatus,
    pub observations: Vec<Observation>,
    pub error: Option<FetchError>,
    /// Fetch attempts made; zero when skipped by the gate.
    pub attempts: u32,
}

impl SourceRunResult {
    pub fn success(spec: &SourceSpec, observations: Vec<Observation>, attempts: u32) -> Self {
        Self {
            source_id: spec.source_id().to_string(),
            category: spec.category(),
            status: SourceStatus::Success,
            observations,
            error: None,
            attempts,
        }
    }

    pub fn failure(spec: &SourceSpec, error: FetchError, attempts: u32) -> Self {
        Self {
            source_id: spec.source_id().to_string(),
            category: spec.category(),
            status: SourceStatus::Failure,
            observations: Vec::new(),
            error: Some(error),
            attempts,
        }
    }

    pub fn skipped(spec: &SourceSpec) -> Self {
        Self {
            source_id: spec.source_id().to_string(),
            category: spec.category(),
            status: SourceStatus::SkippedByGate,
            observations: Vec::new(),
            error: None,
            attempts: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == SourceStatus::Failure
    }
}
