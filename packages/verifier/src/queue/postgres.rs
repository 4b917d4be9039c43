//! PostgreSQL-backed job queue.
//!
//! Claims are atomic via `FOR UPDATE SKIP LOCKED`, so any number of worker
//! processes can pull from the same lanes without double delivery. The
//! lease doubles as the visibility timeout: it must exceed the hard
//! per-job time limit, otherwise a slow job would be delivered twice.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Job, JobQueue, JobSpec, Lane};

const JOB_COLUMNS: &str = "id, job_type, args, owner_id, lane, status, attempt, max_attempts, \
     next_run_at, lease_expires_at, worker_id, error_message, created_at, updated_at";

pub struct PostgresJobQueue {
    pool: PgPool,
    lease: Duration,
}

impl PostgresJobQueue {
    /// `lease` is the visibility timeout; keep it above the hard time limit.
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, job_type, args, owner_id, lane, status, attempt, max_attempts,
                 next_run_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 1, $6, $7, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(&spec.job_type)
        .bind(&spec.args)
        .bind(spec.owner_id)
        .bind(spec.lane)
        .bind(spec.max_attempts)
        .bind(spec.run_at)
        .execute(&self.pool)
        .await
        .context("failed to enqueue job")?;

        Ok(id)
    }

    async fn claim(&self, worker_id: &str, lane: Lane, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE lane = $1
                  AND (
                    (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= NOW()))
                    OR (status = 'running' AND lease_expires_at < NOW())
                  )
                ORDER BY COALESCE(next_run_at, created_at)
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                worker_id = $3,
                lease_expires_at = NOW() + ($4 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(lane)
        .bind(limit)
        .bind(worker_id)
        .bind((self.lease.as_millis() as i64).to_string())
        .fetch_all(&self.pool)
        .await
        .context("failed to claim jobs")?;

        Ok(jobs)
    }

    async fn succeed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("failed to mark job succeeded")?;

        Ok(())
    }

    async fn retry(&self, job_id: Uuid, error: &str, delay: Duration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempt = attempt + 1,
                next_run_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                error_message = $3,
                worker_id = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind((delay.as_millis() as i64).to_string())
        .bind(error)
        .execute(&self.pool)
        .await
        .context("failed to requeue job")?;

        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead_letter',
                error_message = $2,
                worker_id = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("failed to dead-letter job")?;

        Ok(())
    }

    async fn revoke(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("failed to revoke job")?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job =
            sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to load job")?;

        Ok(job)
    }
}
