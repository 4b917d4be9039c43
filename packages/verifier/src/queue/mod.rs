//! Priority queue router.
//!
//! Three lanes with distinct weights and per-worker claim budgets route
//! verification jobs to a pool of runner loops. Delivery is at-least-once:
//! a job is held by at most one worker via a lease, and a worker crash makes
//! the job visible again once the lease expires. Retries are scheduled by
//! setting `next_run_at`; revocation only reaches jobs that have not started.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

mod job;
mod memory;
mod postgres;
mod runner;

pub use job::{Job, JobSpec, JobStatus, Lane};
pub use memory::MemoryJobQueue;
pub use postgres::PostgresJobQueue;
pub use runner::{JobHandler, JobOutcome, JobRunner, JobRunnerConfig};

/// Storage and delivery of queued jobs.
///
/// The queue is mechanical: it never decides whether to retry. The runner
/// classifies each outcome and tells the queue what to do with the job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a new job and make it claimable (at `run_at`, if set).
    async fn enqueue(&self, spec: JobSpec) -> Result<Uuid>;

    /// Claim up to `limit` ready jobs from one lane for this worker.
    ///
    /// Also reclaims running jobs whose lease has expired. Ties within a
    /// lane break by scheduled/creation time on a best-effort basis only.
    async fn claim(&self, worker_id: &str, lane: Lane, limit: i64) -> Result<Vec<Job>>;

    /// Terminal success.
    async fn succeed(&self, job_id: Uuid) -> Result<()>;

    /// Requeue for another attempt after `delay`.
    async fn retry(&self, job_id: Uuid, error: &str, delay: Duration) -> Result<()>;

    /// Terminal failure; the job is dead-lettered with its reason.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Cancel a job that has not started. Returns false when the job was
    /// already running or finished (best-effort revocation).
    async fn revoke(&self, job_id: Uuid) -> Result<bool>;

    /// Look up one job, e.g. for status polling.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;
}
