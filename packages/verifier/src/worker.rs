//! Target verification worker.
//!
//! Runs the four probe steps for one target in fixed order and merges the
//! results. Steps 1–3 (page fetch with link/follow/anchor evaluation, then
//! the search-index query) commit together with a history snapshot; the
//! authority-metrics step commits separately so a metrics failure can never
//! damage the already-written non-metric fields.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::probes::{AuthorityProbe, IndexProbe, PageCheck, PageProbe};
use crate::retry::FailureClass;
use crate::storage::SiteStore;
use crate::types::{AnchorStatus, CheckUpdate, IndexStatus, LinkStatus, Target};

/// How one verification attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// All four steps completed.
    Completed,
    /// Steps 1–3 committed; the metrics probe failed non-throttled, so the
    /// previous metric values stay in place and the job still completes.
    MetricsSkipped,
    /// Steps 1–3 committed; the metrics service throttled us. The whole job
    /// should re-run after the service's fixed delay.
    MetricsDeferred { retry_after: Duration },
    /// The target was deleted between enqueue and execution. No-op success
    /// so the fan-out job count stays consistent.
    TargetGone,
}

pub struct VerificationWorker {
    store: Arc<dyn SiteStore>,
    page: Arc<dyn PageProbe>,
    index: Arc<dyn IndexProbe>,
    authority: Arc<dyn AuthorityProbe>,
    /// Budget for the whole probe sequence of one attempt.
    soft_time_limit: Duration,
}

impl VerificationWorker {
    pub fn new(
        store: Arc<dyn SiteStore>,
        page: Arc<dyn PageProbe>,
        index: Arc<dyn IndexProbe>,
        authority: Arc<dyn AuthorityProbe>,
        soft_time_limit: Duration,
    ) -> Self {
        Self {
            store,
            page,
            index,
            authority,
            soft_time_limit,
        }
    }

    /// Verify one target and merge the results.
    ///
    /// Probe failures in steps 1–3 are absorbed into `Unknown` markers;
    /// storage failures propagate and make the whole attempt retryable.
    pub async fn verify(&self, target_id: Uuid) -> Result<VerifyOutcome> {
        let Some(target) = self.store.get_target(target_id).await? else {
            info!(target_id = %target_id, "target gone before verification, nothing to do");
            return Ok(VerifyOutcome::TargetGone);
        };

        let deadline = tokio::time::Instant::now() + self.soft_time_limit;

        // Steps 1–2: one fetch of the source page covers the link check,
        // the follow relation, and the anchor-text presence.
        let page = match tokio::time::timeout_at(
            deadline,
            self.page
                .check(&target.source_url, &target.link_to_check, &target.anchor_text),
        )
        .await
        {
            Ok(Ok(check)) => Some(check),
            Ok(Err(e)) => {
                warn!(target_id = %target.id, url = %target.source_url, error = %e, "page probe failed");
                None
            }
            Err(_) => {
                warn!(target_id = %target.id, "page probe hit the soft time limit");
                None
            }
        };

        // Step 3: search-index status.
        let index_status = match tokio::time::timeout_at(
            deadline,
            self.index.is_indexed(&target.source_url),
        )
        .await
        {
            Ok(Ok(true)) => IndexStatus::Indexed,
            Ok(Ok(false)) => IndexStatus::NotIndexed,
            Ok(Err(e)) => {
                warn!(target_id = %target.id, error = %e, "index probe failed");
                IndexStatus::Unknown
            }
            Err(_) => {
                warn!(target_id = %target.id, "index probe hit the soft time limit");
                IndexStatus::Unknown
            }
        };

        let update = merge_update(page, index_status);
        self.store.record_check(&target, &update).await?;
        debug!(
            target_id = %target.id,
            link_status = ?update.link_status,
            index_status = ?update.index_status,
            "non-metric results committed"
        );

        // Step 4: authority metrics, committed on their own. Failure keeps
        // the previous values; a throttle signal re-runs the whole job.
        match tokio::time::timeout_at(deadline, self.authority.fetch_metrics(&target.source_url))
            .await
        {
            Ok(Ok(metrics)) => {
                self.store.apply_metrics(target.id, &metrics).await?;
                Ok(VerifyOutcome::Completed)
            }
            Ok(Err(e)) => match e.class() {
                FailureClass::Throttled { retry_after } => {
                    info!(
                        target_id = %target.id,
                        retry_after_s = retry_after.as_secs(),
                        "metrics service throttled, deferring the rest of this job"
                    );
                    Ok(VerifyOutcome::MetricsDeferred { retry_after })
                }
                _ => {
                    warn!(
                        target_id = %target.id,
                        error = %e,
                        "metrics probe failed, keeping previous metric values"
                    );
                    Ok(VerifyOutcome::MetricsSkipped)
                }
            },
            Err(_) => {
                warn!(target_id = %target.id, "metrics probe hit the soft time limit");
                Ok(VerifyOutcome::MetricsSkipped)
            }
        }
    }
}

/// Build the non-metric update from the probe results.
///
/// A failed page probe yields `Unknown` everywhere rather than silently
/// keeping the previous values; a reachable page without the link is a
/// definitive `Missing`.
fn merge_update(page: Option<PageCheck>, index_status: IndexStatus) -> CheckUpdate {
    let checked_at = Utc::now();
    match page {
        Some(check) => CheckUpdate {
            status_code: check.status_code,
            link_status: if check.link_present {
                LinkStatus::Present
            } else {
                LinkStatus::Missing
            },
            follow_status: if check.link_present { check.follow } else { None },
            anchor_status: if check.anchor_present {
                AnchorStatus::Present
            } else {
                AnchorStatus::Missing
            },
            index_status,
            checked_at,
        },
        None => CheckUpdate {
            status_code: None,
            link_status: LinkStatus::Unknown,
            follow_status: None,
            anchor_status: AnchorStatus::Unknown,
            index_status,
            checked_at,
        },
    }
}

/// Returns true when the target can be dispatched at all.
pub fn is_verifiable(target: &Target) -> bool {
    !target.source_url.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{ProbeError, Service};
    use crate::storage::MemorySiteStore;
    use crate::types::{AuthorityMetrics, FollowStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticPage(PageCheck);

    #[async_trait]
    impl PageProbe for StaticPage {
        async fn check(&self, _: &str, _: &str, _: &str) -> Result<PageCheck, ProbeError> {
            Ok(self.0)
        }
    }

    struct FailingPage;

    #[async_trait]
    impl PageProbe for FailingPage {
        async fn check(&self, _: &str, _: &str, _: &str) -> Result<PageCheck, ProbeError> {
            Err(ProbeError::Status {
                service: Service::PageFetch,
                status: reqwest::StatusCode::BAD_GATEWAY,
            })
        }
    }

    struct StaticIndex(bool);

    #[async_trait]
    impl IndexProbe for StaticIndex {
        async fn is_indexed(&self, _: &str) -> Result<bool, ProbeError> {
            Ok(self.0)
        }
    }

    /// Pops one scripted result per call.
    struct ScriptedAuthority(Mutex<Vec<Result<AuthorityMetrics, ProbeError>>>);

    impl ScriptedAuthority {
        fn always(metrics: AuthorityMetrics) -> Self {
            Self(Mutex::new(vec![Ok(metrics), Ok(metrics), Ok(metrics)]))
        }

        fn script(results: Vec<Result<AuthorityMetrics, ProbeError>>) -> Self {
            Self(Mutex::new(results))
        }
    }

    #[async_trait]
    impl AuthorityProbe for ScriptedAuthority {
        async fn fetch_metrics(&self, _: &str) -> Result<AuthorityMetrics, ProbeError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn metrics() -> AuthorityMetrics {
        AuthorityMetrics {
            page_value: Some(40),
            page_trust: Some(50),
            authority_score: Some(60),
            backlinks_external: Some(100),
            outlinks_external: Some(10),
        }
    }

    fn good_page() -> PageCheck {
        PageCheck {
            status_code: Some(200),
            link_present: true,
            follow: Some(FollowStatus::Follow),
            anchor_present: true,
        }
    }

    fn worker(
        store: Arc<MemorySiteStore>,
        page: impl PageProbe + 'static,
        index: impl IndexProbe + 'static,
        authority: impl AuthorityProbe + 'static,
    ) -> VerificationWorker {
        VerificationWorker::new(
            store,
            Arc::new(page),
            Arc::new(index),
            Arc::new(authority),
            Duration::from_secs(300),
        )
    }

    fn seeded_store() -> (Arc<MemorySiteStore>, Uuid) {
        let store = Arc::new(MemorySiteStore::new());
        let target = Target::new(
            Uuid::new_v4(),
            "https://blog.example.com/post",
            "https://client.example.com/",
            "client",
        );
        let id = target.id;
        store.insert_target(target);
        (store, id)
    }

    #[tokio::test]
    async fn full_run_merges_all_fields_and_writes_history() {
        let (store, id) = seeded_store();
        let w = worker(
            store.clone(),
            StaticPage(good_page()),
            StaticIndex(true),
            ScriptedAuthority::always(metrics()),
        );

        let started = Utc::now();
        let outcome = w.verify(id).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Completed);

        let target = store.get_target(id).await.unwrap().unwrap();
        assert_eq!(target.status_code, Some(200));
        assert_eq!(target.link_status, LinkStatus::Present);
        assert_eq!(target.follow_status, Some(FollowStatus::Follow));
        assert_eq!(target.anchor_status, AnchorStatus::Present);
        assert_eq!(target.index_status, IndexStatus::Indexed);
        assert_eq!(target.page_trust, Some(50));
        assert!(target.last_checked.unwrap() >= started);
        assert_eq!(target.first_checked, target.last_checked);

        assert_eq!(store.history_entries().len(), 1);
        // History holds the pre-update state.
        assert_eq!(store.history_entries()[0].link_status, LinkStatus::Unknown);
    }

    #[tokio::test]
    async fn first_checked_is_set_exactly_once() {
        let (store, id) = seeded_store();
        let w = worker(
            store.clone(),
            StaticPage(good_page()),
            StaticIndex(true),
            ScriptedAuthority::always(metrics()),
        );

        w.verify(id).await.unwrap();
        let first = store.get_target(id).await.unwrap().unwrap().first_checked;

        w.verify(id).await.unwrap();
        let target = store.get_target(id).await.unwrap().unwrap();
        assert_eq!(target.first_checked, first);
        assert!(target.last_checked >= first);
    }

    #[tokio::test]
    async fn repeated_runs_are_idempotent_on_non_metric_fields() {
        let (store, id) = seeded_store();
        let w = worker(
            store.clone(),
            StaticPage(good_page()),
            StaticIndex(false),
            ScriptedAuthority::always(metrics()),
        );

        w.verify(id).await.unwrap();
        let once = store.get_target(id).await.unwrap().unwrap();
        w.verify(id).await.unwrap();
        let twice = store.get_target(id).await.unwrap().unwrap();

        assert_eq!(once.link_status, twice.link_status);
        assert_eq!(once.follow_status, twice.follow_status);
        assert_eq!(once.anchor_status, twice.anchor_status);
        assert_eq!(once.index_status, twice.index_status);
        assert_eq!(once.status_code, twice.status_code);
    }

    #[tokio::test]
    async fn failed_page_probe_yields_unknown_markers_not_stale_values() {
        let (store, id) = seeded_store();

        // First, a good run writes definite values.
        let w = worker(
            store.clone(),
            StaticPage(good_page()),
            StaticIndex(true),
            ScriptedAuthority::always(metrics()),
        );
        w.verify(id).await.unwrap();

        // Then the page probe fails; fields must flip to Unknown.
        let w = worker(
            store.clone(),
            FailingPage,
            StaticIndex(true),
            ScriptedAuthority::always(metrics()),
        );
        let outcome = w.verify(id).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Completed);

        let target = store.get_target(id).await.unwrap().unwrap();
        assert_eq!(target.status_code, None);
        assert_eq!(target.link_status, LinkStatus::Unknown);
        assert_eq!(target.follow_status, None);
        assert_eq!(target.anchor_status, AnchorStatus::Unknown);
        // Metrics came from the (successful) step 4 and stay.
        assert_eq!(target.page_value, Some(40));
    }

    #[tokio::test]
    async fn unreachable_page_is_a_definitive_missing_link() {
        let (store, id) = seeded_store();
        let w = worker(
            store.clone(),
            StaticPage(PageCheck {
                status_code: Some(404),
                link_present: false,
                follow: None,
                anchor_present: false,
            }),
            StaticIndex(false),
            ScriptedAuthority::always(metrics()),
        );

        w.verify(id).await.unwrap();
        let target = store.get_target(id).await.unwrap().unwrap();
        assert_eq!(target.status_code, Some(404));
        assert_eq!(target.link_status, LinkStatus::Missing);
        assert_eq!(target.anchor_status, AnchorStatus::Missing);
    }

    #[tokio::test]
    async fn throttled_metrics_defer_the_job_after_committing_steps_one_to_three() {
        let (store, id) = seeded_store();
        let w = worker(
            store.clone(),
            StaticPage(good_page()),
            StaticIndex(true),
            ScriptedAuthority::script(vec![Err(ProbeError::Throttled {
                service: Service::Authority,
                retry_after: Duration::from_secs(60),
            })]),
        );

        let outcome = w.verify(id).await.unwrap();
        assert_eq!(
            outcome,
            VerifyOutcome::MetricsDeferred {
                retry_after: Duration::from_secs(60)
            }
        );

        // Non-metric fields are already committed, metrics untouched.
        let target = store.get_target(id).await.unwrap().unwrap();
        assert_eq!(target.link_status, LinkStatus::Present);
        assert!(target.last_checked.is_some());
        assert_eq!(target.page_value, None);
        assert_eq!(store.history_entries().len(), 1);
    }

    #[tokio::test]
    async fn non_throttled_metrics_failure_keeps_previous_metric_values() {
        let (store, id) = seeded_store();

        // Seed metric values through one full run.
        let w = worker(
            store.clone(),
            StaticPage(good_page()),
            StaticIndex(true),
            ScriptedAuthority::always(metrics()),
        );
        w.verify(id).await.unwrap();

        // Next run's metrics probe fails transiently.
        let w = worker(
            store.clone(),
            StaticPage(good_page()),
            StaticIndex(true),
            ScriptedAuthority::script(vec![Err(ProbeError::Status {
                service: Service::Authority,
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            })]),
        );
        let outcome = w.verify(id).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::MetricsSkipped);

        let target = store.get_target(id).await.unwrap().unwrap();
        assert_eq!(target.page_value, Some(40));
        assert_eq!(target.authority_score, Some(60));
    }

    #[tokio::test]
    async fn deleted_target_is_a_noop_success_without_history() {
        let (store, id) = seeded_store();
        store.remove_target(id);

        let w = worker(
            store.clone(),
            StaticPage(good_page()),
            StaticIndex(true),
            ScriptedAuthority::always(metrics()),
        );

        let outcome = w.verify(id).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::TargetGone);
        assert!(store.history_entries().is_empty());
    }

    #[test]
    fn targets_without_a_source_url_are_not_verifiable() {
        let mut target = Target::new(Uuid::new_v4(), "", "https://c.com", "c");
        target.source_url = "  ".to_string();
        assert!(!is_verifiable(&target));

        let target = Target::new(Uuid::new_v4(), "https://a.com", "https://c.com", "c");
        assert!(is_verifiable(&target));
    }
}
