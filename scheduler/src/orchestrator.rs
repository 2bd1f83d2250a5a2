//! Bounded fetch orchestrator.
//!
//! Responsibilities:
//! - Turn every scheduled source into exactly one `SourceRunResult`.
//! - Run eligible fetches concurrently, never more than `max_concurrent` at once.
//! - Retry transient failures per the source's `RetryPolicy`.
//!
//! Non-responsibilities:
//! - Deciding what is eligible (the gate does this).
//! - Storing or aggregating observations (the run coordinator does this).
//!
//! Safety/liveness properties:
//! - A failing source never prevents other sources from completing.
//! - Each attempt is bounded by the source timeout; the retry loop is bounded by
//!   `max_retries`, so the worst-case latency of a source is auditable.

use std::sync::Arc;
use std::time::Duration;

use adapters::FetchError;
use common::logger::{source_span, warn_if_slow};
use futures::future::join_all;
use market::Observation;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, warn};

use crate::types::{ScheduledSource, SourceRunResult, SourceSpec};

/// Fetches longer than this are flagged in the logs.
const SLOW_FETCH: Duration = Duration::from_secs(10);

pub struct FetchOrchestrator {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl FetchOrchestrator {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Produces one result per scheduled source, in input order.
    ///
    /// Waits for every fetch to settle; no result is dropped.
    pub async fn run(&self, scheduled: &[ScheduledSource<'_>]) -> Vec<SourceRunResult> {
        let eligible = scheduled.iter().filter(|s| s.decision.is_open()).count();
        info!(
            sources = scheduled.len(),
            eligible,
            max_concurrent = self.max_concurrent,
            "fetching sources"
        );

        let results = join_all(scheduled.iter().map(|s| self.run_one(s))).await;

        let failed = results.iter().filter(|r| r.is_failure()).count();
        info!(
            sources = results.len(),
            failed,
            "fetch round complete"
        );

        results
    }

    async fn run_one(&self, scheduled: &ScheduledSource<'_>) -> SourceRunResult {
        let spec = scheduled.spec;

        if !scheduled.decision.is_open() {
            debug!(
                source_id = %spec.source_id(),
                decision = ?scheduled.decision,
                "skipped by market-hours gate"
            );
            return SourceRunResult::skipped(spec);
        }

        let span = source_span(spec.source_id());

        async {
            let (result, attempts) = warn_if_slow(
                "source_fetch",
                SLOW_FETCH,
                fetch_with_retry(spec, &self.permits),
            )
            .await;

            match result {
                Ok(observations) => {
                    info!(
                        attempts,
                        observations = observations.len(),
                        "source fetched"
                    );
                    SourceRunResult::success(spec, observations, attempts)
                }
                Err(error) => {
                    warn!(attempts, error = %error, kind = error.kind(), "source failed");
                    SourceRunResult::failure(spec, error, attempts)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// One bounded retry loop: attempt counter plus backoff schedule.
///
/// Every attempt holds one permit of `permits` while it runs; backoff sleeps
/// hold none. Returns the final outcome and the number of attempts made
/// (`1..=retry.max_attempts()`).
pub async fn fetch_with_retry(
    spec: &SourceSpec,
    permits: &Semaphore,
) -> (Result<Vec<Observation>, FetchError>, u32) {
    let mut attempt: u32 = 0;

    loop {
        // Queue behind the concurrency bound instead of failing.
        let Ok(permit) = permits.acquire().await else {
            return (
                Err(FetchError::Transport("fetch orchestrator closed".into())),
                attempt,
            );
        };

        attempt += 1;
        tracing::Span::current().record("attempt", attempt);

        let outcome = match tokio::time::timeout(spec.timeout, spec.fetcher.fetch(spec.timeout)).await
        {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout(spec.timeout)),
        };
        drop(permit);

        match outcome {
            Ok(observations) => return (Ok(observations), attempt),
            Err(e) if e.is_transient() && attempt <= spec.retry.max_retries => {
                let delay = spec.retry.delay_for(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient fetch failure; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}
