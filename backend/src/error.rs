use std::path::PathBuf;

use market::WindowParseError;
use thiserror::Error;

/// Raised while loading or validating configuration. Always fatal, and always
/// raised before any run starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {source}")]
    Duration {
        field: String,
        #[source]
        source: WindowParseError,
    },

    #[error("no enabled sources configured")]
    NoSources,

    #[error("duplicate source id: {0}")]
    DuplicateSource(String),

    #[error("duplicate interval label: {0}")]
    DuplicateInterval(String),

    #[error("interval {0} must have a positive window")]
    NonPositiveWindow(String),

    #[error("{0} reaches past the earliest representable instant")]
    WindowOutOfRange(String),

    #[error("source {source_id} references unknown interval {label}")]
    UnknownInterval { source_id: String, label: String },

    #[error("unknown source category: {0}")]
    UnknownCategory(String),

    #[error("invalid market hours for {category}: {reason}")]
    MarketHours { category: String, reason: String },

    #[error("max_concurrent_fetches must be at least 1")]
    ZeroConcurrency,

    #[error("retention {retention} for {category} is shorter than its longest window {required}")]
    RetentionTooShort {
        category: String,
        retention: String,
        required: String,
    },

    #[error("source {0}: retry backoff base exceeds cap")]
    BackoffBaseExceedsCap(String),

    #[error("source id {0} clashes with a combined snapshot file")]
    ReservedSourceId(String),

    #[error("invalid display names in {path}: {source}")]
    Dictionary {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("lite asset {symbol} references unknown source {source_id}")]
    UnknownLiteSource { source_id: String, symbol: String },
}

/// Persisting a commit unit failed. Fatal to the run.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("persistence sink failed: {0}")]
    Sink(#[from] SinkError),
}
