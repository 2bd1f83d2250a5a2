mod client;
pub mod mask;
pub mod parser;
pub mod types;

pub use client::{HttpEndpoint, HttpSourceFetcher, build_http_client};
pub use mask::mask_secrets;
pub use parser::{Normalization, parse_observations};
