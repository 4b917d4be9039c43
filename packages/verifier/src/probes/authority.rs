//! Authority-metrics probe.
//!
//! Queries the third-party authority service for one URL and extracts the
//! fixed set of numeric fields. This is the most aggressively rate-limited
//! service in the pipeline, so throttle signals are surfaced explicitly
//! instead of being folded into generic failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{AuthorityProbe, ProbeError, Service, ServiceLimiter};
use crate::types::AuthorityMetrics;

#[derive(Debug, Clone)]
pub struct AuthorityProbeConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Delay the runner should use when the service throttles us.
    pub throttle_retry_after: Duration,
}

impl AuthorityProbeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: "https://www.babbar.tech/api/url/overview/main".to_string(),
            api_key: api_key.into(),
            throttle_retry_after: Duration::from_secs(60),
        }
    }
}

/// Authority probe backed by the real metrics API.
pub struct HttpAuthorityProbe {
    client: reqwest::Client,
    config: AuthorityProbeConfig,
    limiter: Arc<ServiceLimiter>,
}

impl HttpAuthorityProbe {
    pub fn new(
        config: AuthorityProbeConfig,
        limiter: Arc<ServiceLimiter>,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn throttled(&self) -> ProbeError {
        ProbeError::Throttled {
            service: Service::Authority,
            retry_after: self.config.throttle_retry_after,
        }
    }
}

#[async_trait]
impl AuthorityProbe for HttpAuthorityProbe {
    async fn fetch_metrics(&self, url: &str) -> Result<AuthorityMetrics, ProbeError> {
        let _permit = self.limiter.acquire().await;

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "url": url }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(self.throttled());
        }
        if !status.is_success() {
            // The service also reports budget exhaustion in error bodies.
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains("limit") {
                return Err(self.throttled());
            }
            return Err(ProbeError::Status {
                service: Service::Authority,
                status,
            });
        }

        let metrics: AuthorityMetrics =
            response.json().await.map_err(|e| ProbeError::InvalidResponse {
                service: Service::Authority,
                message: e.to_string(),
            })?;

        debug!(url = %url, ?metrics, "authority probe done");
        Ok(metrics)
    }
}
