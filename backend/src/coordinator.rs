//! One ingestion run, end to end.
//!
//! ```text
//! Idle → Gating → Fetching → Appending → Aggregating → Purging → Committing → Done
//!                                                                     ↘ Failed
//! ```
//!
//! Source-level problems (fetch errors, history errors) are contained: the
//! source is marked failed, reported, and the run continues. Only a sink
//! failure fails the run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::logger::{TraceId, run_span};
use history::HistoryStore;
use market::{AggregateBucket, AggregationInterval, RetentionPolicy, SourceCategory, aggregate_all};
use scheduler::{FetchOrchestrator, MarketHoursGate, SourceRunResult, SourceSpec, SourceStatus};
use serde::Serialize;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::RunError;
use crate::notifier::{ErrorReport, Notifier};
use crate::sink::{CombinedViews, CommitReceipt, CommitUnit, LiteAsset, PersistenceSink, SourceCommit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Gating,
    Fetching,
    Appending,
    Aggregating,
    Purging,
    Committing,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Gating => "gating",
            RunState::Fetching => "fetching",
            RunState::Appending => "appending",
            RunState::Aggregating => "aggregating",
            RunState::Purging => "purging",
            RunState::Committing => "committing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetchable source together with what the run does with its history.
#[derive(Debug, Clone)]
pub struct ConfiguredSource {
    pub spec: SourceSpec,
    pub intervals: Vec<AggregationInterval>,
    /// `None` means the history of this source is never purged.
    pub retention: Option<RetentionPolicy>,
}

/// How one source fared in one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub category: SourceCategory,
    #[serde(serialize_with = "status_str")]
    pub status: SourceStatus,
    pub attempts: u32,
    pub observations: usize,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

impl SourceOutcome {
    fn from_result(result: &SourceRunResult) -> Self {
        Self {
            source_id: result.source_id.clone(),
            category: result.category,
            status: result.status,
            attempts: result.attempts,
            observations: result.observations.len(),
            error_kind: result.error.as_ref().map(|e| e.kind().to_string()),
            error: result.error.as_ref().map(|e| e.to_string()),
        }
    }

    fn demote(&mut self, kind: &str, err: &anyhow::Error) {
        self.status = SourceStatus::Failure;
        self.error_kind = Some(kind.to_string());
        self.error = Some(format!("{err:#}"));
    }

    pub fn is_failure(&self) -> bool {
        self.status == SourceStatus::Failure
    }
}

fn status_str<S: serde::Serializer>(status: &SourceStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.as_str())
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub states: Vec<RunState>,
    pub sources: Vec<SourceOutcome>,
    /// Source id → total buckets computed across its intervals.
    pub aggregates: BTreeMap<String, usize>,
    #[serde(skip)]
    pub receipt: CommitReceipt,
}

impl RunReport {
    pub fn outcome(&self, source_id: &str) -> Option<&SourceOutcome> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn failures(&self) -> usize {
        self.sources.iter().filter(|s| s.is_failure()).count()
    }
}

pub struct RunCoordinator {
    sources: Vec<ConfiguredSource>,
    gate: MarketHoursGate,
    orchestrator: FetchOrchestrator,
    history: Arc<dyn HistoryStore>,
    sink: Arc<dyn PersistenceSink>,
    notifier: Arc<dyn Notifier>,
    lite_assets: Vec<LiteAsset>,
    state: RunState,
}

fn advance(state: &mut RunState, trail: &mut Vec<RunState>, next: RunState) {
    debug!(from = %state, to = %next, "run state transition");
    *state = next;
    trail.push(next);
    tracing::Span::current().record("state", next.as_str());
}

impl RunCoordinator {
    pub fn new(
        sources: Vec<ConfiguredSource>,
        gate: MarketHoursGate,
        orchestrator: FetchOrchestrator,
        history: Arc<dyn HistoryStore>,
        sink: Arc<dyn PersistenceSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            sources,
            gate,
            orchestrator,
            history,
            sink,
            notifier,
            lite_assets: Vec::new(),
            state: RunState::Idle,
        }
    }

    /// Symbols published in the lite snapshot.
    pub fn with_lite_assets(mut self, lite_assets: Vec<LiteAsset>) -> Self {
        self.lite_assets = lite_assets;
        self
    }

    /// State reached by the most recent run.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Executes one run as of `now`.
    pub async fn run(&mut self, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        let trace_id = TraceId::new();
        let span = run_span(&trace_id);

        self.run_inner(trace_id, now).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        trace_id: TraceId,
        now: DateTime<Utc>,
    ) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        let mut trail = vec![RunState::Idle];
        self.state = RunState::Idle;

        info!(sources = self.sources.len(), as_of = %now, "run started");

        // ---- Gating ----
        advance(&mut self.state, &mut trail, RunState::Gating);
        let scheduled = self.gate.schedule(self.sources.iter().map(|s| &s.spec), now);

        // ---- Fetching ----
        advance(&mut self.state, &mut trail, RunState::Fetching);
        let results = self.orchestrator.run(&scheduled).await;
        drop(scheduled);

        let mut outcomes: Vec<SourceOutcome> =
            results.iter().map(SourceOutcome::from_result).collect();

        // ---- Appending ----
        advance(&mut self.state, &mut trail, RunState::Appending);
        for (result, outcome) in results.iter().zip(outcomes.iter_mut()) {
            if outcome.is_failure() || result.observations.is_empty() {
                continue;
            }
            if let Err(e) = self
                .history
                .append(&result.source_id, &result.observations)
                .await
            {
                warn!(source_id = %result.source_id, error = %e, "history append failed");
                outcome.demote("history_append", &e);
            }
        }

        // ---- Aggregating ----
        advance(&mut self.state, &mut trail, RunState::Aggregating);
        let mut aggregates: BTreeMap<String, BTreeMap<String, Vec<AggregateBucket>>> =
            BTreeMap::new();
        for (source, outcome) in self.sources.iter().zip(outcomes.iter_mut()) {
            if outcome.is_failure() || source.intervals.is_empty() {
                continue;
            }
            let Some(retention) = source.retention else {
                continue;
            };

            let since = retention.cutoff(now);
            match self.history.snapshot(source.spec.source_id(), since).await {
                Ok(snapshot) => {
                    let buckets = aggregate_all(&snapshot, &source.intervals, now);
                    debug!(
                        source_id = %outcome.source_id,
                        samples = snapshot.len(),
                        intervals = buckets.len(),
                        "aggregated"
                    );
                    aggregates.insert(outcome.source_id.clone(), buckets);
                }
                Err(e) => {
                    warn!(source_id = %outcome.source_id, error = %e, "history snapshot failed");
                    outcome.demote("history_snapshot", &e);
                }
            }
        }

        // ---- Purging ----
        advance(&mut self.state, &mut trail, RunState::Purging);
        for source in &self.sources {
            let Some(retention) = source.retention else {
                continue;
            };
            match self
                .history
                .purge(source.spec.source_id(), retention, now)
                .await
            {
                Ok(removed) if removed > 0 => {
                    debug!(source_id = %source.spec.source_id(), removed, "history purged");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(source_id = %source.spec.source_id(), error = %e, "history purge failed");
                }
            }
        }

        // ---- Committing ----
        advance(&mut self.state, &mut trail, RunState::Committing);
        self.report_failures(&outcomes, now).await;

        let aggregate_counts: BTreeMap<String, usize> = aggregates
            .iter()
            .map(|(id, by_label)| (id.clone(), by_label.values().map(Vec::len).sum()))
            .collect();

        let mut unit = build_commit_unit(results, &outcomes, aggregates);
        if outcomes.iter().any(|o| o.status == SourceStatus::Success) {
            unit.combined = Some(CombinedViews {
                source_ids: self
                    .sources
                    .iter()
                    .map(|s| s.spec.source_id().to_string())
                    .collect(),
                lite_assets: self.lite_assets.clone(),
            });
        }

        let receipt = match self.sink.commit(&unit).await {
            Ok(r) => r,
            Err(e) => {
                advance(&mut self.state, &mut trail, RunState::Failed);
                error!(error = %e, "commit failed; run aborted");
                return Err(RunError::Sink(e));
            }
        };

        advance(&mut self.state, &mut trail, RunState::Done);

        let report = RunReport {
            run_id: trace_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            states: trail,
            sources: outcomes,
            aggregates: aggregate_counts,
            receipt,
        };

        info!(
            failures = report.failures(),
            files = report.receipt.files.len(),
            "run finished"
        );

        Ok(report)
    }

    async fn report_failures(&self, outcomes: &[SourceOutcome], now: DateTime<Utc>) {
        for outcome in outcomes.iter().filter(|o| o.is_failure()) {
            let report = ErrorReport {
                source_id: outcome.source_id.clone(),
                error_kind: outcome.error_kind.clone().unwrap_or_else(|| "unknown".into()),
                message: outcome.error.clone().unwrap_or_default(),
                timestamp: now,
            };

            if let Err(e) = self.notifier.notify(&report).await {
                warn!(source_id = %outcome.source_id, error = %e, "notifier failed");
            }
        }
    }
}

/// Latest sets for successful sources plus every computed aggregate.
fn build_commit_unit(
    results: Vec<SourceRunResult>,
    outcomes: &[SourceOutcome],
    mut aggregates: BTreeMap<String, BTreeMap<String, Vec<AggregateBucket>>>,
) -> CommitUnit {
    let mut unit = CommitUnit::default();

    for (result, outcome) in results.into_iter().zip(outcomes) {
        let latest = (outcome.status == SourceStatus::Success).then_some(result.observations);
        let commit = SourceCommit {
            latest,
            aggregates: aggregates.remove(&outcome.source_id).unwrap_or_default(),
        };

        if !commit.is_empty() {
            unit.sources.insert(outcome.source_id.clone(), commit);
        }
    }

    unit
}
