//! Deciding what to poll and polling it.
//!
//!   - `gate`: pure market-hours check per source category
//!   - `retry`: bounded exponential backoff schedule
//!   - `orchestrator`: concurrent, bounded, failure-isolated fetching

pub mod gate;
pub mod orchestrator;
pub mod retry;
pub mod types;

pub use gate::{GateDecision, MarketHours, MarketHoursGate};
pub use orchestrator::FetchOrchestrator;
pub use retry::RetryPolicy;
pub use types::{ScheduledSource, SourceRunResult, SourceSpec, SourceStatus};
