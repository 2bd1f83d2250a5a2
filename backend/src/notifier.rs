//! Operational failure reporting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

/// One source failure within one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub source_id: String,
    pub error_kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &ErrorReport) -> anyhow::Result<()>;
}

/// Emits every report as a structured error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &ErrorReport) -> anyhow::Result<()> {
        error!(
            source_id = %report.source_id,
            error_kind = %report.error_kind,
            at = %report.timestamp,
            "{}",
            report.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let report = ErrorReport {
            source_id: "crypto".into(),
            error_kind: "timeout".into(),
            message: "request timed out after 15s".into(),
            timestamp: Utc::now(),
        };

        assert!(LogNotifier.notify(&report).await.is_ok());
    }
}
