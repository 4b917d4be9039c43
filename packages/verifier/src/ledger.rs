//! Per-owner job bookkeeping.
//!
//! Every enqueued verification job is recorded against its owner so a later
//! cancellation can find the outstanding jobs. Revocation is best-effort:
//! jobs already running or finished are left alone, only pending ones are
//! cancelled. The ledger rows are cleared either way.

use std::sync::Arc;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::JobQueue;

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Record one enqueued job against its owner.
    async fn record(&self, job_id: Uuid, owner_id: Uuid) -> Result<()>;

    /// All job ids recorded for the owner, oldest first.
    async fn for_owner(&self, owner_id: Uuid) -> Result<Vec<Uuid>>;

    /// Drop every ledger row for the owner. Returns the number removed.
    async fn delete_for_owner(&self, owner_id: Uuid) -> Result<u64>;
}

pub struct PostgresJobLedger {
    pool: PgPool,
}

impl PostgresJobLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobLedger for PostgresJobLedger {
    async fn record(&self, job_id: Uuid, owner_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_ledger (job_id, owner_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .context("failed to record job in ledger")?;

        Ok(())
    }

    async fn for_owner(&self, owner_id: Uuid) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT job_id FROM job_ledger WHERE owner_id = $1 ORDER BY created_at",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list ledger jobs")?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_for_owner(&self, owner_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_ledger WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .context("failed to clear ledger")?;

        Ok(result.rows_affected())
    }
}

/// In-memory ledger for tests.
#[derive(Default)]
pub struct MemoryJobLedger {
    entries: Mutex<Vec<(Uuid, Uuid)>>,
}

impl MemoryJobLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobLedger for MemoryJobLedger {
    async fn record(&self, job_id: Uuid, owner_id: Uuid) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if !entries.iter().any(|(j, _)| *j == job_id) {
            entries.push((job_id, owner_id));
        }
        Ok(())
    }

    async fn for_owner(&self, owner_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, o)| *o == owner_id)
            .map(|(j, _)| *j)
            .collect())
    }

    async fn delete_for_owner(&self, owner_id: Uuid) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|(_, o)| *o != owner_id);
        Ok((before - entries.len()) as u64)
    }
}

/// Cancel the owner's outstanding jobs and clear their ledger rows.
///
/// Returns the number of jobs actually revoked. Jobs that were already
/// running, finished, or unknown to the queue count as not revoked; a
/// revoke error on one job does not stop the sweep.
pub async fn cancel_owner_jobs(
    ledger: &dyn JobLedger,
    queue: &Arc<dyn JobQueue>,
    owner_id: Uuid,
) -> Result<u64> {
    let job_ids = ledger.for_owner(owner_id).await?;
    let total = job_ids.len();

    let mut revoked = 0u64;
    for job_id in job_ids {
        match queue.revoke(job_id).await {
            Ok(true) => revoked += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(job_id = %job_id, owner_id = %owner_id, error = %e, "failed to revoke job");
            }
        }
    }

    let cleared = ledger.delete_for_owner(owner_id).await?;
    info!(
        owner_id = %owner_id,
        tracked = total,
        revoked,
        cleared,
        "cancelled owner jobs"
    );

    Ok(revoked)
}
