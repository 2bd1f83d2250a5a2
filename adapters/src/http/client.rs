use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use market::{Observation, SourceCategory};
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tracing::{debug, instrument};

use crate::fetcher::{FetchError, SourceFetcher};
use crate::filter::Blacklist;
use crate::http::mask::mask_secrets;
use crate::http::parser::{Normalization, parse_observations};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36";

/// Shared HTTP client for every source of a run.
///
/// Connection pooling is per client, so all fetchers should be built from one
/// instance. Timeouts are applied per request by the fetcher.
pub fn build_http_client() -> Result<Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
        .map_err(|e| FetchError::Transport(e.to_string()))
}

/// Where and how to reach one upstream endpoint.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub source_id: String,
    pub category: SourceCategory,
    pub base_url: String,
    /// Path and query; `{api_key}` is substituted.
    pub relative_url: String,
    pub api_key: String,
    pub normalization: Normalization,
}

impl HttpEndpoint {
    pub fn url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.relative_url.replace("{api_key}", &self.api_key)
        )
    }
}

/// Polls a JSON endpoint and normalizes the body with its category parser.
pub struct HttpSourceFetcher {
    http: Client,
    endpoint: HttpEndpoint,
    url: String,
    blacklist: Arc<Blacklist>,
}

impl HttpSourceFetcher {
    pub fn new(http: Client, endpoint: HttpEndpoint, blacklist: Arc<Blacklist>) -> Self {
        let url = endpoint.url();
        Self {
            http,
            endpoint,
            url,
            blacklist,
        }
    }

    /// The request URL with secrets masked, safe for logs.
    pub fn masked_url(&self) -> String {
        mask_secrets(&self.url)
    }

    fn classify(&self, e: reqwest::Error, timeout: Duration) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(timeout)
        } else if e.is_decode() || e.is_body() {
            FetchError::Malformed(mask_secrets(&e.to_string()))
        } else {
            FetchError::Transport(mask_secrets(&e.to_string()))
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    fn source_id(&self) -> &str {
        &self.endpoint.source_id
    }

    fn category(&self) -> SourceCategory {
        self.endpoint.category
    }

    #[instrument(
        skip(self),
        fields(source_id = %self.endpoint.source_id, category = %self.endpoint.category),
        level = "debug"
    )]
    async fn fetch(&self, timeout: Duration) -> Result<Vec<Observation>, FetchError> {
        debug!(url = %self.masked_url(), "requesting");

        let resp = self
            .http
            .get(&self.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.classify(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Upstream {
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|e| self.classify(e, timeout))?;

        let parsed = parse_observations(
            self.endpoint.category,
            &self.endpoint.source_id,
            &body,
            Utc::now(),
            &self.endpoint.normalization,
        )?;
        let parsed_len = parsed.len();
        let observations = self.blacklist.retain(parsed);

        debug!(
            status = status.as_u16(),
            parsed = parsed_len,
            kept = observations.len(),
            "response parsed"
        );

        Ok(observations)
    }
}
