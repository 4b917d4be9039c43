//! PostgreSQL-backed stores.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{SiteStore, SnapshotStore};
use crate::types::{AuthorityMetrics, CheckUpdate, HistoryEntry, MetricsSnapshot, Target};

const TARGET_COLUMNS: &str = "id, owner_id, source_url, link_to_check, anchor_text, domain, \
     status_code, link_status, follow_status, anchor_status, index_status, \
     page_value, page_trust, authority_score, backlinks_external, outlinks_external, \
     first_checked, last_checked, created_at, updated_at";

pub struct PostgresSiteStore {
    pool: PgPool,
}

impl PostgresSiteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteStore for PostgresSiteStore {
    async fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        let target = sqlx::query_as::<_, Target>(&format!(
            "SELECT {TARGET_COLUMNS} FROM targets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load target")?;

        Ok(target)
    }

    async fn list_targets(&self, owner_id: Uuid) -> Result<Vec<Target>> {
        let targets = sqlx::query_as::<_, Target>(&format!(
            "SELECT {TARGET_COLUMNS} FROM targets WHERE owner_id = $1 ORDER BY created_at"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list targets for owner")?;

        Ok(targets)
    }

    async fn list_owners(&self) -> Result<Vec<Uuid>> {
        let owners: Vec<(Uuid,)> =
            sqlx::query_as("SELECT DISTINCT owner_id FROM targets ORDER BY owner_id")
                .fetch_all(&self.pool)
                .await
                .context("failed to enumerate owners")?;

        Ok(owners.into_iter().map(|(id,)| id).collect())
    }

    async fn record_check(&self, prior: &Target, update: &CheckUpdate) -> Result<()> {
        let history = HistoryEntry::snapshot_of(prior);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO target_history
                (id, target_id, status_code, link_status, follow_status, anchor_status,
                 index_status, page_value, page_trust, authority_score,
                 backlinks_external, outlinks_external, last_checked, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(history.id)
        .bind(history.target_id)
        .bind(history.status_code)
        .bind(history.link_status)
        .bind(history.follow_status)
        .bind(history.anchor_status)
        .bind(history.index_status)
        .bind(history.page_value)
        .bind(history.page_trust)
        .bind(history.authority_score)
        .bind(history.backlinks_external)
        .bind(history.outlinks_external)
        .bind(history.last_checked)
        .bind(history.recorded_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert history entry")?;

        sqlx::query(
            r#"
            UPDATE targets
            SET status_code = $2,
                link_status = $3,
                follow_status = $4,
                anchor_status = $5,
                index_status = $6,
                last_checked = $7,
                first_checked = COALESCE(first_checked, $7),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(prior.id)
        .bind(update.status_code)
        .bind(update.link_status)
        .bind(update.follow_status)
        .bind(update.anchor_status)
        .bind(update.index_status)
        .bind(update.checked_at)
        .execute(&mut *tx)
        .await
        .context("failed to apply verification result")?;

        tx.commit().await.context("failed to commit verification")?;
        Ok(())
    }

    async fn apply_metrics(&self, target_id: Uuid, metrics: &AuthorityMetrics) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE targets
            SET page_value = $2,
                page_trust = $3,
                authority_score = $4,
                backlinks_external = $5,
                outlinks_external = $6,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(target_id)
        .bind(metrics.page_value)
        .bind(metrics.page_trust)
        .bind(metrics.authority_score)
        .bind(metrics.backlinks_external)
        .bind(metrics.outlinks_external)
        .execute(&self.pool)
        .await
        .context("failed to apply authority metrics")?;

        Ok(())
    }
}

pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn append(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics_snapshots
                (id, owner_id, taken_at, total_targets, total_domains,
                 follow_percentage, avg_quality, raw_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.owner_id)
        .bind(snapshot.taken_at)
        .bind(snapshot.total_targets)
        .bind(snapshot.total_domains)
        .bind(snapshot.follow_percentage)
        .bind(snapshot.avg_quality)
        .bind(&snapshot.raw_data)
        .execute(&self.pool)
        .await
        .context("failed to append metrics snapshot")?;

        Ok(())
    }
}
