//! Application configuration.
//!
//! Loaded from a TOML file when one exists, otherwise from built-in defaults
//! that list the standard upstream sources. A handful of environment
//! variables override the file. Everything is validated up front; a
//! configuration that loads is safe to run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};
use market::{AggregationInterval, RetentionPolicy, SourceCategory, parse_std_duration, parse_window};
use scheduler::{MarketHours, MarketHoursGate, RetryPolicy};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::sink::{CONSOLIDATED_FILE, LITE_FILE, LiteAsset};

pub const DEFAULT_CONFIG_PATH: &str = "config/market.toml";

pub const ENV_BASE_URL: &str = "BRS_BASE_URL";
pub const ENV_API_KEY: &str = "BRS_API_KEY";
pub const ENV_DATA_DIR: &str = "MARKET_DATA_DIR";
pub const ENV_HISTORY_URL: &str = "MARKET_HISTORY_URL";

const DEFAULT_LEVELS: [&str; 5] = ["4h", "12h", "24h", "3d", "7d"];

// =========================
// File format
// =========================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawConfig {
    base_url: String,
    api_key: String,
    max_concurrent_fetches: usize,
    data_dir: PathBuf,
    history_url: String,
    pretty_json: bool,
    blacklist: Vec<String>,
    intervals: Vec<RawInterval>,
    sources: Vec<RawSource>,
    market_hours: BTreeMap<String, RawMarketHours>,
    retention: BTreeMap<String, String>,
    lite_assets: Vec<RawLiteAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLiteAsset {
    source: String,
    symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawInterval {
    label: String,
    window: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSource {
    id: String,
    category: SourceCategory,
    relative_url: String,
    #[serde(default = "default_timeout")]
    timeout: String,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_backoff_base")]
    retry_backoff_base: String,
    #[serde(default = "default_backoff_cap")]
    retry_backoff_cap: String,
    #[serde(default)]
    intervals: Vec<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    symbol_aliases: HashMap<String, String>,
    #[serde(default)]
    display_names: HashMap<String, String>,
    /// JSON object of upstream symbol → display name.
    #[serde(default)]
    display_names_file: Option<PathBuf>,
    #[serde(default)]
    persian_digits: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMarketHours {
    utc_offset_minutes: i32,
    open: String,
    close: String,
    trading_days: Vec<String>,
    #[serde(default)]
    holidays: Vec<String>,
}

fn default_timeout() -> String {
    "15s".into()
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base() -> String {
    "500ms".into()
}

fn default_backoff_cap() -> String {
    "8s".into()
}

fn default_enabled() -> bool {
    true
}

fn raw_source(
    id: &str,
    category: SourceCategory,
    relative_url: &str,
    intervals: &[&str],
) -> RawSource {
    RawSource {
        id: id.into(),
        category,
        relative_url: relative_url.into(),
        timeout: default_timeout(),
        max_retries: default_max_retries(),
        retry_backoff_base: default_backoff_base(),
        retry_backoff_cap: default_backoff_cap(),
        intervals: intervals.iter().map(|s| s.to_string()).collect(),
        enabled: true,
        symbol_aliases: HashMap::new(),
        display_names: HashMap::new(),
        display_names_file: None,
        persian_digits: false,
    }
}

impl Default for RawConfig {
    fn default() -> Self {
        let sources = vec![
            raw_source(
                "gold",
                SourceCategory::Gold,
                "/Api/Market/Gold_Currency.php?key={api_key}",
                &DEFAULT_LEVELS,
            ),
            raw_source(
                "currency",
                SourceCategory::Currency,
                "/Api/Market/Gold_Currency.php?key={api_key}",
                &DEFAULT_LEVELS,
            ),
            raw_source(
                "cryptocurrency",
                SourceCategory::Crypto,
                "/Api/Market/Cryptocurrency.php?key={api_key}",
                &DEFAULT_LEVELS,
            ),
            raw_source(
                "commodity",
                SourceCategory::Commodity,
                "/Api/Market/Commodity.php?key={api_key}",
                &DEFAULT_LEVELS,
            ),
            RawSource {
                persian_digits: true,
                ..raw_source(
                    "tse_ifb_symbols",
                    SourceCategory::Stock,
                    "/Api/Tsetmc/AllSymbols.php?key={api_key}&type=1",
                    &["24h", "7d"],
                )
            },
        ];

        let mut market_hours = BTreeMap::new();
        market_hours.insert(
            SourceCategory::Stock.as_str().to_string(),
            RawMarketHours {
                utc_offset_minutes: 210,
                open: "08:30".into(),
                close: "12:45".into(),
                trading_days: ["sat", "sun", "mon", "tue", "wed"]
                    .iter()
                    .map(|d| d.to_string())
                    .collect(),
                holidays: Vec::new(),
            },
        );

        Self {
            base_url: String::new(),
            api_key: String::new(),
            max_concurrent_fetches: 10,
            data_dir: PathBuf::from("api/v1/market"),
            history_url: "sqlite://market_history.db".into(),
            pretty_json: true,
            blacklist: Vec::new(),
            intervals: DEFAULT_LEVELS
                .iter()
                .map(|l| RawInterval {
                    label: l.to_string(),
                    window: l.to_string(),
                })
                .collect(),
            sources,
            market_hours,
            retention: BTreeMap::new(),
            lite_assets: Vec::new(),
        }
    }
}

// =========================
// Validated configuration
// =========================

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub category: SourceCategory,

    /// Appended to `base_url`; `{api_key}` is substituted at request time.
    pub relative_url: String,

    /// Per-attempt timeout.
    pub timeout: Duration,

    pub retry: RetryPolicy,

    /// Aggregation intervals computed for this source, resolved from the
    /// top-level interval table.
    pub intervals: Vec<AggregationInterval>,

    /// Upstream symbol → published symbol.
    pub symbol_aliases: HashMap<String, String>,

    /// Upstream symbol → display name, file entries merged under inline ones.
    pub display_names: HashMap<String, String>,

    /// Digits of symbols and names are published as Persian digits.
    pub persian_digits: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Upstream API root, e.g. `https://api.example.com`.
    pub base_url: String,

    /// Secret substituted into source URLs. Never logged.
    pub api_key: String,

    /// Upper bound on fetches in flight at once.
    pub max_concurrent_fetches: usize,

    /// Root directory of the published JSON files.
    pub data_dir: PathBuf,

    /// Raw history location: `memory` or a sqlite URL.
    pub history_url: String,

    pub pretty_json: bool,

    /// Symbols or names dropped from every source.
    pub blacklist: Vec<String>,

    pub intervals: Vec<AggregationInterval>,

    /// Enabled sources only, in configuration order.
    pub sources: Vec<SourceConfig>,

    /// Categories listed here are polled only inside their trading window.
    pub market_hours: HashMap<SourceCategory, MarketHours>,

    /// Effective retention per category. Categories that never aggregate have
    /// no entry unless one was configured explicitly.
    pub retention: HashMap<SourceCategory, RetentionPolicy>,

    /// Picks published in the lite snapshot, in order.
    pub lite_assets: Vec<LiteAsset>,
}

impl AppConfig {
    /// Reads `path` when it exists, otherwise uses the built-in defaults.
    /// Environment overrides are applied from the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        } else {
            RawConfig::default()
        };

        Self::from_raw(raw, env)
    }

    pub fn from_toml_with<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_raw(toml::from_str(content)?, env)
    }

    /// Built-in defaults plus environment overrides.
    pub fn defaults_with<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_raw(RawConfig::default(), env)
    }

    fn from_raw<F>(mut raw: RawConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env(ENV_BASE_URL) {
            raw.base_url = v;
        }
        if let Some(v) = env(ENV_API_KEY) {
            raw.api_key = v;
        }
        if let Some(v) = env(ENV_DATA_DIR) {
            raw.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env(ENV_HISTORY_URL) {
            raw.history_url = v;
        }

        if raw.max_concurrent_fetches == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        let intervals = resolve_intervals(&raw.intervals)?;
        let sources = resolve_sources(&raw.sources, &intervals)?;
        let market_hours = resolve_market_hours(&raw.market_hours)?;
        let retention = resolve_retention(&raw.retention, &sources)?;
        let lite_assets = resolve_lite_assets(&raw.lite_assets, &sources)?;

        Ok(Self {
            base_url: raw.base_url,
            api_key: raw.api_key,
            max_concurrent_fetches: raw.max_concurrent_fetches,
            data_dir: raw.data_dir,
            history_url: raw.history_url,
            pretty_json: raw.pretty_json,
            blacklist: raw.blacklist,
            intervals,
            sources,
            market_hours,
            retention,
            lite_assets,
        })
    }

    pub fn gate(&self) -> MarketHoursGate {
        self.market_hours
            .iter()
            .fold(MarketHoursGate::new(), |gate, (category, hours)| {
                gate.with_schedule(*category, hours.clone())
            })
    }

    pub fn retention_for(&self, category: SourceCategory) -> Option<RetentionPolicy> {
        self.retention.get(&category).copied()
    }
}

/// Parses a lookback window that can be subtracted from the current time.
fn window(field: &str, value: &str) -> Result<TimeDelta, ConfigError> {
    let w = parse_window(value).map_err(|source| ConfigError::Duration {
        field: field.to_string(),
        source,
    })?;

    if Utc::now().checked_sub_signed(w).is_none() {
        return Err(ConfigError::WindowOutOfRange(field.to_string()));
    }

    Ok(w)
}

fn std_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_std_duration(value).map_err(|source| ConfigError::Duration {
        field: field.to_string(),
        source,
    })
}

fn resolve_intervals(raw: &[RawInterval]) -> Result<Vec<AggregationInterval>, ConfigError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for r in raw {
        if !seen.insert(r.label.as_str()) {
            return Err(ConfigError::DuplicateInterval(r.label.clone()));
        }

        let w = window(&format!("intervals.{}", r.label), &r.window)?;
        if w <= TimeDelta::zero() {
            return Err(ConfigError::NonPositiveWindow(r.label.clone()));
        }

        out.push(AggregationInterval::new(r.label.clone(), w));
    }

    Ok(out)
}

fn resolve_sources(
    raw: &[RawSource],
    intervals: &[AggregationInterval],
) -> Result<Vec<SourceConfig>, ConfigError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for r in raw {
        if !seen.insert(r.id.as_str()) {
            return Err(ConfigError::DuplicateSource(r.id.clone()));
        }
        if !r.enabled {
            continue;
        }
        if [CONSOLIDATED_FILE, LITE_FILE]
            .iter()
            .any(|f| f.strip_suffix(".json") == Some(r.id.as_str()))
        {
            return Err(ConfigError::ReservedSourceId(r.id.clone()));
        }

        let retry = RetryPolicy {
            max_retries: r.max_retries,
            base_delay: std_duration(
                &format!("sources.{}.retry_backoff_base", r.id),
                &r.retry_backoff_base,
            )?,
            max_delay: std_duration(
                &format!("sources.{}.retry_backoff_cap", r.id),
                &r.retry_backoff_cap,
            )?,
        };
        if retry.base_delay > retry.max_delay {
            return Err(ConfigError::BackoffBaseExceedsCap(r.id.clone()));
        }

        let source_intervals = r
            .intervals
            .iter()
            .map(|label| {
                intervals
                    .iter()
                    .find(|i| &i.label == label)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownInterval {
                        source_id: r.id.clone(),
                        label: label.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        out.push(SourceConfig {
            id: r.id.clone(),
            category: r.category,
            relative_url: r.relative_url.clone(),
            timeout: std_duration(&format!("sources.{}.timeout", r.id), &r.timeout)?,
            retry,
            intervals: source_intervals,
            symbol_aliases: r.symbol_aliases.clone(),
            display_names: display_names(r)?,
            persian_digits: r.persian_digits,
        });
    }

    if out.is_empty() {
        return Err(ConfigError::NoSources);
    }

    Ok(out)
}

/// Names from `display_names_file` overlaid with the inline table.
fn display_names(r: &RawSource) -> Result<HashMap<String, String>, ConfigError> {
    let mut names: HashMap<String, String> = match &r.display_names_file {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| ConfigError::Dictionary {
                path: path.clone(),
                source,
            })?
        }
        None => HashMap::new(),
    };

    names.extend(r.display_names.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(names)
}

fn resolve_lite_assets(
    raw: &[RawLiteAsset],
    sources: &[SourceConfig],
) -> Result<Vec<LiteAsset>, ConfigError> {
    raw.iter()
        .map(|a| {
            if !sources.iter().any(|s| s.id == a.source) {
                return Err(ConfigError::UnknownLiteSource {
                    source_id: a.source.clone(),
                    symbol: a.symbol.clone(),
                });
            }
            Ok(LiteAsset {
                source_id: a.source.clone(),
                symbol: a.symbol.clone(),
            })
        })
        .collect()
}

fn resolve_market_hours(
    raw: &BTreeMap<String, RawMarketHours>,
) -> Result<HashMap<SourceCategory, MarketHours>, ConfigError> {
    let mut out = HashMap::new();

    for (name, r) in raw {
        let category: SourceCategory = name
            .parse()
            .map_err(|_| ConfigError::UnknownCategory(name.clone()))?;

        let invalid = |reason: String| ConfigError::MarketHours {
            category: name.clone(),
            reason,
        };

        let utc_offset = FixedOffset::east_opt(r.utc_offset_minutes.saturating_mul(60))
            .ok_or_else(|| invalid(format!("utc offset {} out of range", r.utc_offset_minutes)))?;
        let open = NaiveTime::parse_from_str(&r.open, "%H:%M")
            .map_err(|e| invalid(format!("open {:?}: {e}", r.open)))?;
        let close = NaiveTime::parse_from_str(&r.close, "%H:%M")
            .map_err(|e| invalid(format!("close {:?}: {e}", r.close)))?;
        if open >= close {
            return Err(invalid(format!("open {open} is not before close {close}")));
        }

        let trading_days = r
            .trading_days
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|_| invalid(format!("unknown weekday {d:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if trading_days.is_empty() {
            return Err(invalid("no trading days".into()));
        }

        let holidays = r
            .holidays
            .iter()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| invalid(format!("holiday {d:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        out.insert(
            category,
            MarketHours {
                utc_offset,
                open,
                close,
                trading_days,
                holidays,
            },
        );
    }

    Ok(out)
}

/// Per category: the longest window any of its sources aggregates over, or
/// the explicit retention when one is set and long enough.
fn resolve_retention(
    raw: &BTreeMap<String, String>,
    sources: &[SourceConfig],
) -> Result<HashMap<SourceCategory, RetentionPolicy>, ConfigError> {
    let mut out: HashMap<SourceCategory, RetentionPolicy> = HashMap::new();

    for s in sources {
        if let Some(needed) = RetentionPolicy::covering(&s.intervals) {
            out.entry(s.category)
                .and_modify(|p| {
                    if needed.max_window > p.max_window {
                        *p = needed;
                    }
                })
                .or_insert(needed);
        }
    }

    for (name, value) in raw {
        let category: SourceCategory = name
            .parse()
            .map_err(|_| ConfigError::UnknownCategory(name.clone()))?;
        let explicit = window(&format!("retention.{name}"), value)?;

        if let Some(required) = out.get(&category)
            && explicit < required.max_window
        {
            return Err(ConfigError::RetentionTooShort {
                category: name.clone(),
                retention: value.clone(),
                required: format!("{}s", required.max_window.num_seconds()),
            });
        }

        out.insert(category, RetentionPolicy::new(explicit));
    }

    Ok(out)
}
