use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{Span, field};

use super::TraceId;

/// Root span for one ingestion run.
pub fn run_span(trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "run",
        trace_id = %trace_id,
        state = field::Empty
    )
}

/// Child span for work scoped to a single source (inherits the run's trace_id).
pub fn source_span(source_id: &str) -> Span {
    tracing::info_span!("source", source_id = %source_id, attempt = field::Empty)
}

/// Awaits `fut` and emits a warning when it took longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
