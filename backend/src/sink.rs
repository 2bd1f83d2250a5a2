//! Durable output of a run: latest raw sets and aggregate buckets as JSON
//! files.
//!
//! Layout under the sink root:
//!
//! ```text
//! <root>/<source_id>.json
//! <root>/aggregates/<source_id>/<label>.json
//! <root>/all_market_data.json      every source's latest set, keyed by id
//! <root>/lite.json                 configured picks, keyed by source id
//! ```
//!
//! A commit is two-phase: every file is written in full to a `*.json.tmp`
//! sibling first, then all temp files are renamed into place. A failed write
//! removes the temp files and leaves every existing file untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use market::{AggregateBucket, Observation};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::SinkError;

/// What one source contributes to a commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCommit {
    /// `None` leaves the previously committed latest set in place.
    pub latest: Option<Vec<Observation>>,
    /// Interval label → buckets.
    pub aggregates: BTreeMap<String, Vec<AggregateBucket>>,
}

impl SourceCommit {
    pub fn is_empty(&self) -> bool {
        self.latest.is_none() && self.aggregates.is_empty()
    }
}

pub const CONSOLIDATED_FILE: &str = "all_market_data.json";
pub const LITE_FILE: &str = "lite.json";

/// One symbol of one source picked into the lite snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteAsset {
    pub source_id: String,
    pub symbol: String,
}

/// Request to rebuild the combined snapshots in the same commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedViews {
    /// Every configured source, in configuration order. Sources without a new
    /// latest set contribute their previously committed file.
    pub source_ids: Vec<String>,
    /// Empty means no lite snapshot.
    pub lite_assets: Vec<LiteAsset>,
}

/// Everything one run persists, committed as a single logical unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitUnit {
    pub sources: BTreeMap<String, SourceCommit>,
    pub combined: Option<CombinedViews>,
}

impl CommitUnit {
    pub fn is_empty(&self) -> bool {
        self.combined.is_none() && self.sources.values().all(SourceCommit::is_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    pub files: Vec<PathBuf>,
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn commit(&self, unit: &CommitUnit) -> Result<CommitReceipt, SinkError>;
}

pub struct JsonFileSink {
    root: PathBuf,
    pretty: bool,
}

impl JsonFileSink {
    pub fn new(root: impl Into<PathBuf>, pretty: bool) -> Self {
        Self {
            root: root.into(),
            pretty,
        }
    }

    pub fn latest_path(&self, source_id: &str) -> PathBuf {
        self.root.join(format!("{source_id}.json"))
    }

    pub fn aggregate_path(&self, source_id: &str, label: &str) -> PathBuf {
        self.root
            .join("aggregates")
            .join(source_id)
            .join(format!("{label}.json"))
    }

    fn encode<T: Serialize + ?Sized>(&self, what: &Path, value: &T) -> Result<Vec<u8>, SinkError> {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };

        encoded.map_err(|source| SinkError::Serialize {
            what: what.display().to_string(),
            source,
        })
    }

    pub fn consolidated_path(&self) -> PathBuf {
        self.root.join(CONSOLIDATED_FILE)
    }

    pub fn lite_path(&self) -> PathBuf {
        self.root.join(LITE_FILE)
    }

    /// Latest set of `source_id`: from the unit when it carries one, else the
    /// committed file. Missing or unreadable files contribute nothing.
    async fn latest_for(&self, unit: &CommitUnit, source_id: &str) -> Option<Vec<Observation>> {
        if let Some(latest) = unit.sources.get(source_id).and_then(|c| c.latest.clone()) {
            return Some(latest);
        }

        let path = self.latest_path(source_id);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable latest file");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(latest) => Some(latest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping undecodable latest file");
                None
            }
        }
    }

    async fn plan_combined(
        &self,
        unit: &CommitUnit,
        views: &CombinedViews,
    ) -> Result<Vec<(PathBuf, Vec<u8>)>, SinkError> {
        let mut consolidated: BTreeMap<&str, Vec<Observation>> = BTreeMap::new();
        for id in &views.source_ids {
            if let Some(latest) = self.latest_for(unit, id).await {
                consolidated.insert(id.as_str(), latest);
            }
        }

        let mut files = Vec::with_capacity(2);
        let path = self.consolidated_path();
        let bytes = self.encode(&path, &consolidated)?;
        files.push((path, bytes));

        if !views.lite_assets.is_empty() {
            let mut lite: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
            let mut found = 0;
            for asset in &views.lite_assets {
                let pick = consolidated
                    .get(asset.source_id.as_str())
                    .and_then(|set| set.iter().find(|o| o.symbol == asset.symbol));
                if let Some(obs) = pick {
                    lite.entry(asset.source_id.as_str()).or_default().push(obs);
                    found += 1;
                }
            }
            if found < views.lite_assets.len() {
                warn!(
                    requested = views.lite_assets.len(),
                    found,
                    "lite snapshot is missing assets"
                );
            }

            let path = self.lite_path();
            let bytes = self.encode(&path, &lite)?;
            files.push((path, bytes));
        }

        Ok(files)
    }

    /// Final path and encoded bytes of every file in the unit.
    async fn plan(&self, unit: &CommitUnit) -> Result<Vec<(PathBuf, Vec<u8>)>, SinkError> {
        let mut files = Vec::new();

        for (source_id, commit) in &unit.sources {
            if let Some(latest) = &commit.latest {
                let path = self.latest_path(source_id);
                let bytes = self.encode(&path, latest)?;
                files.push((path, bytes));
            }

            for (label, buckets) in &commit.aggregates {
                let path = self.aggregate_path(source_id, label);
                let bytes = self.encode(&path, buckets)?;
                files.push((path, bytes));
            }
        }

        if let Some(views) = &unit.combined {
            files.extend(self.plan_combined(unit, views).await?);
        }

        Ok(files)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Writes `bytes` to `tmp` and flushes them to disk before returning.
async fn stage(tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn remove_tmp_files(paths: &[PathBuf]) {
    for tmp in paths {
        if let Err(e) = fs::remove_file(tmp).await {
            warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
        }
    }
}

#[async_trait]
impl PersistenceSink for JsonFileSink {
    async fn commit(&self, unit: &CommitUnit) -> Result<CommitReceipt, SinkError> {
        let files = self.plan(unit).await?;
        if files.is_empty() {
            debug!("nothing to commit");
            return Ok(CommitReceipt::default());
        }

        for (path, _) in &files {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).await.map_err(|source| SinkError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        // Phase 1: stage every file.
        let mut staged: Vec<PathBuf> = Vec::with_capacity(files.len());
        for (path, bytes) in &files {
            let tmp = tmp_path(path);
            if let Err(source) = stage(&tmp, bytes).await {
                remove_tmp_files(&staged).await;
                return Err(SinkError::Io { path: tmp, source });
            }
            staged.push(tmp);
        }

        // Phase 2: publish.
        for (i, (path, _)) in files.iter().enumerate() {
            if let Err(source) = fs::rename(&staged[i], path).await {
                remove_tmp_files(&staged[i..]).await;
                return Err(SinkError::Io {
                    path: path.clone(),
                    source,
                });
            }
        }

        info!(files = files.len(), root = %self.root.display(), "commit published");

        Ok(CommitReceipt {
            files: files.into_iter().map(|(path, _)| path).collect(),
        })
    }
}
