
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use adapters::FetchError;
use async_trait::async_trait;
use backend::{
    ConfiguredSource, JsonFileSink, LiteAsset, PersistenceSink, RunCoordinator, RunError,
    RunState,
};
use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use history::{HistoryStore, MemoryHistoryStore};
use market::{AggregateBucket, AggregationInterval, Observation, RetentionPolicy, SourceCategory};
use scheduler::{FetchOrchestrator, MarketHours, MarketHoursGate, RetryPolicy, SourceSpec, SourceStatus};

use mocks::{BrokenNotifier, MockFetcher, RecordingNotifier, RecordingSink, shared};

// -----------------------
// Helpers
// -----------------------

/// Friday 20:00 in Tehran: stock market closed, everything else pollable.
fn now() -> DateTime<Utc> {
    FixedOffset::east_opt(3 * 3600 + 30 * 60)
        .unwrap()
        .with_ymd_and_hms(2026, 1, 9, 20, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn obs(source: &str, symbol: &str, hours_ago: i64, price: f64) -> Observation {
    Observation::new(source, symbol, now() - TimeDelta::hours(hours_ago), price)
}

fn intervals() -> Vec<AggregationInterval> {
    vec![
        AggregationInterval::new("24h", TimeDelta::hours(24)),
        AggregationInterval::new("7d", TimeDelta::days(7)),
    ]
}

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
    }
}

fn source(fetcher: Arc<MockFetcher>) -> ConfiguredSource {
    let intervals = intervals();
    ConfiguredSource {
        spec: SourceSpec::new(fetcher, Duration::from_secs(1), retry()),
        retention: RetentionPolicy::covering(&intervals),
        intervals,
    }
}

fn gold_ok() -> Arc<MockFetcher> {
    shared(MockFetcher::new("gold", SourceCategory::Gold).then(Ok(vec![
        obs("gold", "IR_GOLD_18K", 1, 10.0),
        obs("gold", "IR_GOLD_24K", 1, 12.0),
        obs("gold", "IR_COIN_1G", 1, 11.0),
    ])))
}

fn crypto_hangs() -> Arc<MockFetcher> {
    shared(
        MockFetcher::new("crypto", SourceCategory::Crypto)
            .then_after(Duration::from_secs(60), Ok(vec![obs("crypto", "BTC", 0, 1.0)])),
    )
}

fn coordinator(
    sources: Vec<ConfiguredSource>,
    history: Arc<dyn HistoryStore>,
    sink: Arc<dyn PersistenceSink>,
    notifier: Arc<dyn backend::Notifier>,
) -> RunCoordinator {
    let gate =
        MarketHoursGate::new().with_schedule(SourceCategory::Stock, MarketHours::tehran_exchange());
    RunCoordinator::new(sources, gate, FetchOrchestrator::new(4), history, sink, notifier)
}

fn read_buckets(path: &std::path::Path) -> Vec<AggregateBucket> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

// -----------------------
// Runs
// -----------------------

#[tokio::test(start_paused = true)]
async fn timeout_on_one_source_still_publishes_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonFileSink::new(dir.path(), true));
    std::fs::write(sink.latest_path("crypto"), b"[\"previous\"]").unwrap();

    let crypto = crypto_hangs();
    let notifier = shared(RecordingNotifier::default());
    let mut run = coordinator(
        vec![source(gold_ok()), source(crypto.clone())],
        shared(MemoryHistoryStore::new()),
        sink.clone(),
        notifier.clone(),
    );

    let report = run.run(now()).await.unwrap();

    assert_eq!(run.state(), RunState::Done);
    assert_eq!(
        report.states,
        vec![
            RunState::Idle,
            RunState::Gating,
            RunState::Fetching,
            RunState::Appending,
            RunState::Aggregating,
            RunState::Purging,
            RunState::Committing,
            RunState::Done,
        ]
    );

    // gold: latest + aggregates published
    let latest: Vec<Observation> =
        serde_json::from_slice(&std::fs::read(sink.latest_path("gold")).unwrap()).unwrap();
    assert_eq!(latest.len(), 3);

    let day = read_buckets(&sink.aggregate_path("gold", "24h"));
    assert_eq!(day.len(), 3);
    assert!(day.iter().all(|b| b.sample_count == 1));
    assert!(sink.aggregate_path("gold", "7d").exists());

    // crypto: untouched, reported once
    assert_eq!(
        std::fs::read(sink.latest_path("crypto")).unwrap(),
        b"[\"previous\"]"
    );
    assert!(!sink.aggregate_path("crypto", "24h").exists());
    assert_eq!(crypto.calls(), 3);

    // consolidated view: gold's fresh set; crypto's previous file does not decode
    let all: serde_json::Value =
        serde_json::from_slice(&std::fs::read(sink.consolidated_path()).unwrap()).unwrap();
    assert_eq!(all["gold"].as_array().unwrap().len(), 3);
    assert!(all.get("crypto").is_none());
    assert!(!sink.lite_path().exists());

    let crypto_outcome = report.outcome("crypto").unwrap();
    assert_eq!(crypto_outcome.status, SourceStatus::Failure);
    assert_eq!(crypto_outcome.attempts, 3);

    let reports = notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].source_id, "crypto");
    assert_eq!(reports[0].error_kind, "timeout");
    assert_eq!(reports[0].timestamp, now());
}

#[tokio::test(start_paused = true)]
async fn history_accumulates_across_runs() {
    let history = shared(MemoryHistoryStore::new());
    let sink = shared(RecordingSink::default());
    let mut run = coordinator(
        vec![source(gold_ok())],
        history.clone(),
        sink.clone(),
        shared(RecordingNotifier::default()),
    );

    run.run(now()).await.unwrap();
    let report = run.run(now()).await.unwrap();

    assert_eq!(history.len("gold"), 6);
    assert_eq!(report.aggregates["gold"], 6);

    let unit = sink.last().unwrap();
    let day = &unit.sources["gold"].aggregates["24h"];
    let ounce = day.iter().find(|b| b.symbol == "IR_GOLD_24K").unwrap();
    assert_eq!(ounce.sample_count, 2);
    assert_eq!(ounce.median_price, 12.0);
    assert_eq!(unit.sources["gold"].latest.as_ref().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn gated_sources_are_skipped_and_keep_their_latest() {
    let stock = shared(
        MockFetcher::new("tse", SourceCategory::Stock).then(Ok(vec![obs("tse", "FOLD", 0, 1.0)])),
    );
    let history = shared(MemoryHistoryStore::new());
    history
        .append("tse", &[obs("tse", "FOLD", 30, 5_000.0)])
        .await
        .unwrap();
    let sink = shared(RecordingSink::default());
    let notifier = shared(RecordingNotifier::default());

    let mut run = coordinator(
        vec![source(stock.clone())],
        history,
        sink.clone(),
        notifier.clone(),
    );
    let report = run.run(now()).await.unwrap();

    assert_eq!(stock.calls(), 0);
    assert_eq!(report.outcome("tse").unwrap().status, SourceStatus::SkippedByGate);
    assert!(notifier.reports().is_empty());

    let unit = sink.last().unwrap();
    assert!(unit.combined.is_none(), "no fresh data, no combined views");
    let tse = &unit.sources["tse"];
    assert!(tse.latest.is_none());
    assert!(tse.aggregates["24h"].is_empty());
    assert_eq!(tse.aggregates["7d"].len(), 1);
}

#[tokio::test(start_paused = true)]
async fn combined_views_cover_every_source_and_the_lite_picks() {
    let sink = shared(RecordingSink::default());
    let picks = vec![LiteAsset {
        source_id: "gold".into(),
        symbol: "IR_GOLD_24K".into(),
    }];
    let mut run = coordinator(
        vec![source(gold_ok()), source(crypto_hangs())],
        shared(MemoryHistoryStore::new()),
        sink.clone(),
        shared(RecordingNotifier::default()),
    )
    .with_lite_assets(picks.clone());

    run.run(now()).await.unwrap();

    let combined = sink.last().unwrap().combined.unwrap();
    assert_eq!(combined.source_ids, vec!["gold", "crypto"]);
    assert_eq!(combined.lite_assets, picks);
}

#[tokio::test(start_paused = true)]
async fn expired_history_is_purged() {
    let history = shared(MemoryHistoryStore::new());
    history
        .append(
            "gold",
            &[
                obs("gold", "IR_GOLD_18K", 24 * 8, 1.0),
                obs("gold", "IR_GOLD_18K", 24 * 6, 2.0),
            ],
        )
        .await
        .unwrap();

    let mut run = coordinator(
        vec![source(gold_ok())],
        history.clone(),
        shared(RecordingSink::default()),
        shared(RecordingNotifier::default()),
    );
    run.run(now()).await.unwrap();

    let left = history
        .snapshot("gold", DateTime::<Utc>::UNIX_EPOCH)
        .await
        .unwrap();
    assert_eq!(left.len(), 4);
    assert!(left.iter().all(|o| o.timestamp >= now() - TimeDelta::days(7)));
}

#[tokio::test(start_paused = true)]
async fn sink_failure_fails_the_run() {
    let notifier = shared(RecordingNotifier::default());
    let mut run = coordinator(
        vec![source(gold_ok()), source(crypto_hangs())],
        shared(MemoryHistoryStore::new()),
        shared(RecordingSink::failing()),
        notifier.clone(),
    );

    let err = run.run(now()).await.unwrap_err();

    assert!(matches!(err, RunError::Sink(_)));
    assert_eq!(run.state(), RunState::Failed);
    assert_eq!(notifier.reports().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn notifier_failure_does_not_abort_the_run() {
    let notifier = shared(BrokenNotifier::default());
    let mut run = coordinator(
        vec![source(gold_ok()), source(crypto_hangs())],
        shared(MemoryHistoryStore::new()),
        shared(RecordingSink::default()),
        notifier.clone(),
    );

    let report = run.run(now()).await.unwrap();

    assert_eq!(run.state(), RunState::Done);
    assert_eq!(report.failures(), 1);
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 1);
}

/// Rejects writes for one source, delegates everything else.
struct FlakyHistory {
    inner: MemoryHistoryStore,
    broken: &'static str,
}

#[async_trait]
impl HistoryStore for FlakyHistory {
    async fn append(&self, source_id: &str, observations: &[Observation]) -> anyhow::Result<()> {
        if source_id == self.broken {
            anyhow::bail!("database is locked");
        }
        self.inner.append(source_id, observations).await
    }

    async fn snapshot(
        &self,
        source_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Observation>> {
        self.inner.snapshot(source_id, since).await
    }

    async fn purge(
        &self,
        source_id: &str,
        retention: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        self.inner.purge(source_id, retention, now).await
    }

    async fn sources(&self) -> anyhow::Result<Vec<String>> {
        self.inner.sources().await
    }
}

#[tokio::test(start_paused = true)]
async fn append_failure_demotes_only_that_source() {
    let fx = shared(
        MockFetcher::new("fx", SourceCategory::Currency).then(Ok(vec![obs("fx", "USD", 0, 9.0)])),
    );
    let history = shared(FlakyHistory {
        inner: MemoryHistoryStore::new(),
        broken: "fx",
    });
    let sink = shared(RecordingSink::default());
    let notifier = shared(RecordingNotifier::default());

    let mut run = coordinator(
        vec![source(gold_ok()), source(fx)],
        history,
        sink.clone(),
        notifier.clone(),
    );
    let report = run.run(now()).await.unwrap();

    let fx_outcome = report.outcome("fx").unwrap();
    assert_eq!(fx_outcome.status, SourceStatus::Failure);
    assert_eq!(fx_outcome.error_kind.as_deref(), Some("history_append"));

    let unit = sink.last().unwrap();
    assert!(!unit.sources.contains_key("fx"));
    assert!(unit.sources["gold"].latest.is_some());

    let reports = notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].source_id, "fx");
}

#[tokio::test(start_paused = true)]
async fn malformed_source_is_reported_without_retry() {
    let broken = shared(
        MockFetcher::new("commodity", SourceCategory::Commodity)
            .then(Err(FetchError::Malformed("expected object".into()))),
    );
    let notifier = shared(RecordingNotifier::default());
    let mut run = coordinator(
        vec![source(broken.clone())],
        shared(MemoryHistoryStore::new()),
        shared(RecordingSink::default()),
        notifier.clone(),
    );

    run.run(now()).await.unwrap();

    assert_eq!(broken.calls(), 1);
    assert_eq!(notifier.reports()[0].error_kind, "malformed_response");
}
