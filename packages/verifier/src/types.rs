//! Core data model: targets, history entries, and metrics snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Whether the monitored link was found on the source page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "link_status", rename_all = "snake_case")]
pub enum LinkStatus {
    Present,
    Missing,
    /// The check itself failed; says nothing about the link.
    #[default]
    Unknown,
}

/// Whether the anchor text was found in any anchor element on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "anchor_status", rename_all = "snake_case")]
pub enum AnchorStatus {
    Present,
    Missing,
    #[default]
    Unknown,
}

/// rel attribute of the monitored link, known only when the link is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "follow_status", rename_all = "snake_case")]
pub enum FollowStatus {
    Follow,
    NoFollow,
}

/// Search-engine index status of the source page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "index_status", rename_all = "snake_case")]
pub enum IndexStatus {
    Indexed,
    NotIndexed,
    #[default]
    Unknown,
}

// ============================================================================
// Target
// ============================================================================

/// One monitored (source page, link-to-check) pair owned by one user.
///
/// `(source_url, link_to_check, owner_id)` is unique. Authority metric
/// fields stay NULL until the first successful metrics probe.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub owner_id: Uuid,

    pub source_url: String,
    pub link_to_check: String,
    pub anchor_text: String,
    /// Host of the source URL, used for distinct-domain rollups.
    pub domain: String,

    // Live verification state
    pub status_code: Option<i32>,
    pub link_status: LinkStatus,
    pub follow_status: Option<FollowStatus>,
    pub anchor_status: AnchorStatus,
    pub index_status: IndexStatus,

    // Authority metrics (never reset on probe failure)
    pub page_value: Option<i32>,
    pub page_trust: Option<i32>,
    pub authority_score: Option<i32>,
    pub backlinks_external: Option<i32>,
    pub outlinks_external: Option<i32>,

    /// Set exactly once, on the first verification that reaches the merge.
    pub first_checked: Option<DateTime<Utc>>,
    /// Updated on every verification attempt that reaches the merge.
    pub last_checked: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    /// Create a fresh, never-checked target.
    pub fn new(
        owner_id: Uuid,
        source_url: impl Into<String>,
        link_to_check: impl Into<String>,
        anchor_text: impl Into<String>,
    ) -> Self {
        let source_url = source_url.into();
        let domain = url::Url::parse(&source_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            owner_id,
            source_url,
            link_to_check: link_to_check.into(),
            anchor_text: anchor_text.into(),
            domain,
            status_code: None,
            link_status: LinkStatus::Unknown,
            follow_status: None,
            anchor_status: AnchorStatus::Unknown,
            index_status: IndexStatus::Unknown,
            page_value: None,
            page_trust: None,
            authority_score: None,
            backlinks_external: None,
            outlinks_external: None,
            first_checked: None,
            last_checked: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Verification results
// ============================================================================

/// Non-metric field values produced by one verification attempt.
///
/// Every field carries a definite value: a probe that failed yields the
/// `Unknown` marker rather than leaving the previous value in place.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckUpdate {
    pub status_code: Option<i32>,
    pub link_status: LinkStatus,
    pub follow_status: Option<FollowStatus>,
    pub anchor_status: AnchorStatus,
    pub index_status: IndexStatus,
    pub checked_at: DateTime<Utc>,
}

/// Numeric fields returned by the authority-metrics service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AuthorityMetrics {
    #[serde(rename = "pageValue")]
    pub page_value: Option<i32>,
    #[serde(rename = "pageTrust")]
    pub page_trust: Option<i32>,
    #[serde(rename = "authorityScore", alias = "babbarAuthorityScore")]
    pub authority_score: Option<i32>,
    #[serde(rename = "backlinksExternal")]
    pub backlinks_external: Option<i32>,
    #[serde(rename = "numOutLinksExt")]
    pub outlinks_external: Option<i32>,
}

// ============================================================================
// History
// ============================================================================

/// Immutable snapshot of a target's prior state, written just before a new
/// verification result is applied. Audit-only; the pipeline never reads it.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub target_id: Uuid,

    pub status_code: Option<i32>,
    pub link_status: LinkStatus,
    pub follow_status: Option<FollowStatus>,
    pub anchor_status: AnchorStatus,
    pub index_status: IndexStatus,
    pub page_value: Option<i32>,
    pub page_trust: Option<i32>,
    pub authority_score: Option<i32>,
    pub backlinks_external: Option<i32>,
    pub outlinks_external: Option<i32>,
    pub last_checked: Option<DateTime<Utc>>,

    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Snapshot the checkable fields of a target as they stand now.
    pub fn snapshot_of(target: &Target) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target.id,
            status_code: target.status_code,
            link_status: target.link_status,
            follow_status: target.follow_status,
            anchor_status: target.anchor_status,
            index_status: target.index_status,
            page_value: target.page_value,
            page_trust: target.page_trust,
            authority_score: target.authority_score,
            backlinks_external: target.backlinks_external,
            outlinks_external: target.outlinks_external,
            last_checked: target.last_checked,
            recorded_at: Utc::now(),
        }
    }
}

// ============================================================================
// Metrics snapshots
// ============================================================================

/// Point-in-time aggregate for one owner, appended after every fan-out.
///
/// Reflects pre-verification state and serves as a trend baseline; it is
/// independent of how the individual jobs turn out.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub taken_at: DateTime<Utc>,

    pub total_targets: i64,
    pub total_domains: i64,
    pub follow_percentage: f64,
    pub avg_quality: f64,

    pub raw_data: serde_json::Value,
}

impl MetricsSnapshot {
    /// Compute a snapshot from an owner's current targets.
    ///
    /// Quality is `0.6 * page_trust + 0.4 * page_value`, averaged over the
    /// targets that have both metrics.
    pub fn from_targets(owner_id: Uuid, targets: &[Target]) -> Self {
        let total_targets = targets.len() as i64;

        let mut domains: Vec<&str> = targets
            .iter()
            .map(|t| t.domain.as_str())
            .filter(|d| !d.is_empty())
            .collect();
        domains.sort_unstable();
        domains.dedup();
        let total_domains = domains.len() as i64;

        let follow_count = targets
            .iter()
            .filter(|t| t.follow_status == Some(FollowStatus::Follow))
            .count();
        let follow_percentage = if total_targets > 0 {
            (follow_count as f64 / total_targets as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        let qualities: Vec<f64> = targets
            .iter()
            .filter_map(|t| match (t.page_trust, t.page_value) {
                (Some(trust), Some(value)) => Some(f64::from(trust) * 0.6 + f64::from(value) * 0.4),
                _ => None,
            })
            .collect();
        let avg_quality = if qualities.is_empty() {
            0.0
        } else {
            (qualities.iter().sum::<f64>() / qualities.len() as f64 * 10.0).round() / 10.0
        };

        Self {
            id: Uuid::new_v4(),
            owner_id,
            taken_at: Utc::now(),
            total_targets,
            total_domains,
            follow_percentage,
            avg_quality,
            raw_data: serde_json::json!({
                "total_targets": total_targets,
                "total_domains": total_domains,
                "follow_percentage": follow_percentage,
                "avg_quality": avg_quality,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with(
        source_url: &str,
        follow: Option<FollowStatus>,
        trust: Option<i32>,
        value: Option<i32>,
    ) -> Target {
        let mut t = Target::new(
            Uuid::new_v4(),
            source_url,
            "https://client.example.com/",
            "client",
        );
        t.follow_status = follow;
        t.page_trust = trust;
        t.page_value = value;
        t
    }

    #[test]
    fn new_target_derives_domain_from_source_url() {
        let t = Target::new(Uuid::new_v4(), "https://blog.example.com/post?x=1", "https://c.com", "c");
        assert_eq!(t.domain, "blog.example.com");
        assert_eq!(t.link_status, LinkStatus::Unknown);
        assert!(t.first_checked.is_none());
    }

    #[test]
    fn snapshot_counts_follow_percentage_and_distinct_domains() {
        let owner = Uuid::new_v4();
        // The first two targets share a domain.
        let targets = vec![
            target_with(
                "https://blog.example.com/post",
                Some(FollowStatus::Follow),
                Some(50),
                Some(40),
            ),
            target_with(
                "https://blog.example.com/other",
                Some(FollowStatus::NoFollow),
                None,
                Some(40),
            ),
            target_with("https://news.example.org/story", None, Some(80), Some(60)),
            target_with(
                "https://forum.example.net/thread",
                Some(FollowStatus::Follow),
                None,
                None,
            ),
        ];

        let snap = MetricsSnapshot::from_targets(owner, &targets);
        assert_eq!(snap.total_targets, 4);
        assert_eq!(snap.total_domains, 3);
        assert_eq!(snap.follow_percentage, 50.0);
        // quality over the two targets with both metrics: (50*0.6+40*0.4)=46, (80*0.6+60*0.4)=72
        assert_eq!(snap.avg_quality, 59.0);
    }

    #[test]
    fn snapshot_of_empty_target_set_is_all_zeros() {
        let snap = MetricsSnapshot::from_targets(Uuid::new_v4(), &[]);
        assert_eq!(snap.total_targets, 0);
        assert_eq!(snap.follow_percentage, 0.0);
        assert_eq!(snap.avg_quality, 0.0);
    }

    #[test]
    fn history_entry_copies_current_field_values() {
        let mut t = target_with(
            "https://blog.example.com/post",
            Some(FollowStatus::Follow),
            Some(10),
            Some(20),
        );
        t.status_code = Some(200);
        t.link_status = LinkStatus::Present;

        let entry = HistoryEntry::snapshot_of(&t);
        assert_eq!(entry.target_id, t.id);
        assert_eq!(entry.status_code, Some(200));
        assert_eq!(entry.link_status, LinkStatus::Present);
        assert_eq!(entry.page_trust, Some(10));
    }
}
