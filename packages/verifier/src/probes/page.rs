//! Source-page probe: one HTTP fetch plus HTML evaluation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::{PageCheck, PageProbe, ProbeError, ServiceLimiter};
use crate::types::FollowStatus;

/// Path component of an href, tolerant of relative links.
fn href_path(href: &str) -> String {
    match Url::parse(href) {
        Ok(parsed) => parsed.path().to_string(),
        // Relative href: strip query string and fragment by hand.
        Err(_) => href
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or(href)
            .to_string(),
    }
}

/// Evaluate a fetched page against one target.
///
/// The link counts as present when any anchor's href matches the
/// link-to-check exactly or by path component (tolerating query-string and
/// fragment differences). The follow relation comes from the first matching
/// anchor. Anchor-text presence is a substring test over the text of every
/// anchor on the page, independent of which link carries it.
pub fn evaluate_page(
    html: &str,
    link_to_check: &str,
    anchor_text: &str,
) -> (bool, Option<FollowStatus>, bool) {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a").expect("static selector");
    let target_path = href_path(link_to_check);

    let mut link_present = false;
    let mut follow = None;
    let mut anchor_present = false;

    for element in document.select(&anchors) {
        if !anchor_present {
            let text: String = element.text().collect();
            if text.contains(anchor_text) {
                anchor_present = true;
            }
        }

        if link_present {
            continue;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href == link_to_check || href_path(href) == target_path {
            link_present = true;
            let nofollow = element
                .value()
                .attr("rel")
                .map(|rel| {
                    rel.split_whitespace()
                        .any(|token| token.eq_ignore_ascii_case("nofollow"))
                })
                .unwrap_or(false);
            follow = Some(if nofollow {
                FollowStatus::NoFollow
            } else {
                FollowStatus::Follow
            });
        }
    }

    (link_present, follow, anchor_present)
}

/// Page probe backed by a real HTTP client.
pub struct HttpPageProbe {
    client: reqwest::Client,
    limiter: Arc<ServiceLimiter>,
}

impl HttpPageProbe {
    pub fn new(limiter: Arc<ServiceLimiter>) -> Result<Self, ProbeError> {
        // Browser-like User-Agent; some source pages reject obvious bots.
        let client = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, limiter })
    }
}

#[async_trait]
impl PageProbe for HttpPageProbe {
    async fn check(
        &self,
        source_url: &str,
        link_to_check: &str,
        anchor_text: &str,
    ) -> Result<PageCheck, ProbeError> {
        let _permit = self.limiter.acquire().await;

        let response = self.client.get(source_url).send().await?;
        let status = response.status();

        if !status.is_success() {
            // The page answered; the link is definitively not served.
            debug!(url = %source_url, status = %status, "source page not reachable with success status");
            return Ok(PageCheck {
                status_code: Some(i32::from(status.as_u16())),
                link_present: false,
                follow: None,
                anchor_present: false,
            });
        }

        let body = response.text().await?;
        let (link_present, follow, anchor_present) = evaluate_page(&body, link_to_check, anchor_text);

        Ok(PageCheck {
            status_code: Some(i32::from(status.as_u16())),
            link_present,
            follow,
            anchor_present,
        })
    }
}
