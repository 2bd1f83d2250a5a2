//! Source Fetcher capability and its HTTP implementations.
//!
//! Every upstream speaks a slightly different JSON dialect. This crate is the
//! only place that knows about them: each category parser normalizes its shape
//! into [`market::Observation`], so format drift stays at this boundary.

pub mod fetcher;
pub mod filter;
pub mod http;

pub use fetcher::{FetchError, SourceFetcher};
pub use filter::Blacklist;
pub use http::{HttpEndpoint, HttpSourceFetcher, Normalization};
