use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "market-ingest", version, about = "Fetch market prices and publish rolling aggregates")]
pub struct Cli {
    /// TOML configuration file. Built-in defaults are used when it does not exist.
    #[arg(long, default_value = crate::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Raw history location: `memory` or a sqlite URL. Overrides the config.
    #[arg(long)]
    pub history: Option<String>,

    /// Output directory for published JSON. Overrides the config.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub report: bool,
}
