//! Market ingestion service: configuration, run coordination and output.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notifier;
pub mod sink;

pub use config::AppConfig;
pub use coordinator::{ConfiguredSource, RunCoordinator, RunReport, RunState, SourceOutcome};
pub use error::{ConfigError, RunError, SinkError};
pub use notifier::{ErrorReport, LogNotifier, Notifier};
pub use sink::{
    CombinedViews, CommitReceipt, CommitUnit, JsonFileSink, LiteAsset, PersistenceSink,
    SourceCommit,
};
