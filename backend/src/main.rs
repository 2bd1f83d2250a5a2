use std::sync::Arc;

use backend::cli::Cli;
use backend::{AppConfig, JsonFileSink, LogNotifier, bootstrap};
use chrono::Utc;
use clap::Parser;
use common::logger::init_logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("market-ingest", is_production);

    let mut cfg = AppConfig::load(&cli.config)?;
    if let Some(history) = cli.history {
        cfg.history_url = history;
    }
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }

    tracing::info!(
        config = %cli.config.display(),
        sources = cfg.sources.len(),
        data_dir = %cfg.data_dir.display(),
        "starting market ingestion"
    );
    if cfg.base_url.is_empty() {
        tracing::warn!("base url is empty; set BRS_BASE_URL or base_url in the config");
    }

    let history = bootstrap::open_history(&cfg.history_url).await?;
    let sources = bootstrap::http_sources(&cfg)?;
    let sink = Arc::new(JsonFileSink::new(cfg.data_dir.clone(), cfg.pretty_json));

    let mut coordinator =
        bootstrap::coordinator(&cfg, sources, history, sink, Arc::new(LogNotifier));

    let report = coordinator.run(Utc::now()).await?;

    if cli.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
