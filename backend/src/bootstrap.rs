//! Builds the run's collaborators from a validated [`AppConfig`].

use std::sync::Arc;

use adapters::http::build_http_client;
use adapters::{Blacklist, HttpEndpoint, HttpSourceFetcher, Normalization};
use anyhow::Context;
use history::{HistoryStore, MemoryHistoryStore, SqliteHistoryStore};
use scheduler::{FetchOrchestrator, SourceSpec};
use tracing::info;

use crate::config::AppConfig;
use crate::coordinator::{ConfiguredSource, RunCoordinator};
use crate::notifier::Notifier;
use crate::sink::PersistenceSink;

pub const MEMORY_HISTORY: &str = "memory";

/// One HTTP fetcher per enabled source, sharing a client and the blacklist.
pub fn http_sources(cfg: &AppConfig) -> anyhow::Result<Vec<ConfiguredSource>> {
    let client = build_http_client().context("building http client")?;
    let blacklist = Arc::new(Blacklist::new(cfg.blacklist.iter().cloned()));

    Ok(cfg
        .sources
        .iter()
        .map(|s| {
            let endpoint = HttpEndpoint {
                source_id: s.id.clone(),
                category: s.category,
                base_url: cfg.base_url.clone(),
                relative_url: s.relative_url.clone(),
                api_key: cfg.api_key.clone(),
                normalization: Normalization {
                    symbol_aliases: s.symbol_aliases.clone(),
                    display_names: s.display_names.clone(),
                    persian_digits: s.persian_digits,
                },
            };
            let fetcher = HttpSourceFetcher::new(client.clone(), endpoint, blacklist.clone());

            ConfiguredSource {
                spec: SourceSpec::new(Arc::new(fetcher), s.timeout, s.retry),
                intervals: s.intervals.clone(),
                retention: cfg.retention_for(s.category),
            }
        })
        .collect())
}

/// Opens the raw history and logs which sources already hold samples.
pub async fn open_history(url: &str) -> anyhow::Result<Arc<dyn HistoryStore>> {
    let store: Arc<dyn HistoryStore> = if url == MEMORY_HISTORY {
        info!("using in-memory raw history");
        Arc::new(MemoryHistoryStore::new())
    } else {
        let store = SqliteHistoryStore::connect(url)
            .await
            .with_context(|| format!("opening raw history at {url}"))?;
        info!(url, "using sqlite raw history");
        Arc::new(store)
    };

    let held = store
        .sources()
        .await
        .context("listing sources in raw history")?;
    info!(sources = ?held, "raw history ready");

    Ok(store)
}

pub fn coordinator(
    cfg: &AppConfig,
    sources: Vec<ConfiguredSource>,
    history: Arc<dyn HistoryStore>,
    sink: Arc<dyn PersistenceSink>,
    notifier: Arc<dyn Notifier>,
) -> RunCoordinator {
    RunCoordinator::new(
        sources,
        cfg.gate(),
        FetchOrchestrator::new(cfg.max_concurrent_fetches),
        history,
        sink,
        notifier,
    )
    .with_lite_assets(cfg.lite_assets.clone())
}
