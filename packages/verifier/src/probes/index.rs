//! Search-index probe: is the source URL indexed by the search engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{IndexProbe, ProbeError, Service, ServiceLimiter};

#[derive(Debug, Clone)]
pub struct IndexProbeConfig {
    pub endpoint: String,
    pub api_key: String,
    pub location: String,
    /// Delay the runner should use when the service throttles us.
    pub throttle_retry_after: Duration,
}

impl IndexProbeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: "https://serpapi.com/search.json".to_string(),
            api_key: api_key.into(),
            location: "France".to_string(),
            throttle_retry_after: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    link: String,
}

/// Indexed means the URL appears in at least one returned result link.
fn contains_url(results: &[OrganicResult], url: &str) -> bool {
    results.iter().any(|result| result.link.contains(url))
}

/// Index probe backed by a SERP-style search API.
pub struct HttpIndexProbe {
    client: reqwest::Client,
    config: IndexProbeConfig,
    limiter: Arc<ServiceLimiter>,
}

impl HttpIndexProbe {
    pub fn new(config: IndexProbeConfig, limiter: Arc<ServiceLimiter>) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            config,
            limiter,
        })
    }
}

#[async_trait]
impl IndexProbe for HttpIndexProbe {
    async fn is_indexed(&self, url: &str) -> Result<bool, ProbeError> {
        let _permit = self.limiter.acquire().await;

        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("engine", "google"),
                ("q", &format!("site:{url}")),
                ("location", &self.config.location),
                ("api_key", &self.config.api_key),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProbeError::Throttled {
                service: Service::SearchIndex,
                retry_after: self.config.throttle_retry_after,
            });
        }
        if !status.is_success() {
            return Err(ProbeError::Status {
                service: Service::SearchIndex,
                status,
            });
        }

        let parsed: SearchResponse =
            response.json().await.map_err(|e| ProbeError::InvalidResponse {
                service: Service::SearchIndex,
                message: e.to_string(),
            })?;

        let indexed = contains_url(&parsed.organic_results, url);
        debug!(url = %url, indexed, results = parsed.organic_results.len(), "index probe done");
        Ok(indexed)
    }
}
