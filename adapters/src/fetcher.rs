use std::time::Duration;

use async_trait::async_trait;
use market::{Observation, SourceCategory};
use thiserror::Error;

/// Failure of a single fetch attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {status}")]
    Upstream { status: u16 },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether another attempt against the same source could succeed.
    ///
    /// Timeouts, connection failures, 5xx and 429 are transient. Malformed
    /// bodies and other 4xx responses are not: retrying the same poll will not
    /// fix them.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Transport(_) => true,
            FetchError::Upstream { status } => *status >= 500 || *status == 429,
            FetchError::Malformed(_) => false,
        }
    }

    /// Stable label used in error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Transport(_) => "transport",
            FetchError::Upstream { .. } => "upstream_status",
            FetchError::Malformed(_) => "malformed_response",
        }
    }
}

/// One configured upstream that can be polled for observations.
///
/// Implementations must honour `timeout` for the whole attempt. The
/// orchestrator also enforces it externally, so a fetcher that overruns is cut
/// off and reported as [`FetchError::Timeout`].
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source_id(&self) -> &str;

    fn category(&self) -> SourceCategory;

    async fn fetch(&self, timeout: Duration) -> Result<Vec<Observation>, FetchError>;
}
