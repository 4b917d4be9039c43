//! External probe clients.
//!
//! Each probe is one narrow, replaceable I/O call with its own timeout:
//! fetch the source page, ask a search engine whether the page is indexed,
//! ask an authority-metrics service about the page. Probes are traits so
//! the worker can be exercised with canned outcomes in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::retry::FailureClass;
use crate::types::{AuthorityMetrics, FollowStatus};

mod authority;
mod index;
mod limiter;
mod page;

pub use authority::{AuthorityProbeConfig, HttpAuthorityProbe};
pub use index::{HttpIndexProbe, IndexProbeConfig};
pub use limiter::ServiceLimiter;
pub use page::{evaluate_page, HttpPageProbe};

/// The rate-limited external services the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    PageFetch,
    SearchIndex,
    Authority,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::PageFetch => "page_fetch",
            Service::SearchIndex => "search_index",
            Service::Authority => "authority",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single probe call.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{service} is over its rate budget, retry after {retry_after:?}")]
    Throttled {
        service: Service,
        retry_after: Duration,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{service} answered with unexpected status {status}")]
    Status {
        service: Service,
        status: reqwest::StatusCode,
    },

    #[error("{service} returned an unusable response: {message}")]
    InvalidResponse { service: Service, message: String },
}

impl ProbeError {
    /// Three-way classification for the retry controller.
    pub fn class(&self) -> FailureClass {
        match self {
            ProbeError::Throttled { retry_after, .. } => FailureClass::Throttled {
                retry_after: *retry_after,
            },
            ProbeError::Request(_) | ProbeError::Status { .. } | ProbeError::InvalidResponse { .. } => {
                FailureClass::Transient
            }
        }
    }
}

/// What one fetch of the source page established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCheck {
    pub status_code: Option<i32>,
    pub link_present: bool,
    /// Only meaningful when the link is present.
    pub follow: Option<FollowStatus>,
    pub anchor_present: bool,
}

/// Fetches the source page and evaluates link, follow relation, and anchor.
#[async_trait]
pub trait PageProbe: Send + Sync {
    async fn check(
        &self,
        source_url: &str,
        link_to_check: &str,
        anchor_text: &str,
    ) -> Result<PageCheck, ProbeError>;
}

/// Asks a search engine whether the source URL is indexed.
#[async_trait]
pub trait IndexProbe: Send + Sync {
    async fn is_indexed(&self, url: &str) -> Result<bool, ProbeError>;
}

/// Fetches third-party authority metrics for the source URL.
#[async_trait]
pub trait AuthorityProbe: Send + Sync {
    async fn fetch_metrics(&self, url: &str) -> Result<AuthorityMetrics, ProbeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_probe_errors_classify_with_their_delay() {
        let err = ProbeError::Throttled {
            service: Service::Authority,
            retry_after: Duration::from_secs(60),
        };
        assert_eq!(
            err.class(),
            FailureClass::Throttled {
                retry_after: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn non_throttled_probe_errors_are_transient() {
        let err = ProbeError::Status {
            service: Service::SearchIndex,
            status: reqwest::StatusCode::BAD_GATEWAY,
        };
        assert_eq!(err.class(), FailureClass::Transient);
    }
}
