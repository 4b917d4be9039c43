//! In-memory job queue with the same delivery contract as the Postgres one.
//!
//! Used by the pipeline tests; claim/lease/retry semantics mirror
//! `PostgresJobQueue` closely enough that the runner cannot tell them apart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{Job, JobQueue, JobSpec, JobStatus, Lane};

pub struct MemoryJobQueue {
    jobs: Mutex<HashMap<Uuid, Job>>,
    lease: Duration,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            lease: Duration::from_secs(420),
        }
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// All jobs, in creation order. Test helper.
    pub fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Clear a pending job's scheduled delay so the next claim picks it up.
    /// Test helper standing in for the passage of wall-clock time.
    pub fn make_ready(&self, job_id: Uuid) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.next_run_at = None;
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let job = Job {
            id,
            job_type: spec.job_type,
            args: spec.args,
            owner_id: spec.owner_id,
            lane: spec.lane,
            status: JobStatus::Pending,
            attempt: 1,
            max_attempts: spec.max_attempts,
            next_run_at: spec.run_at,
            lease_expires_at: None,
            worker_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().unwrap().insert(id, job);
        Ok(id)
    }

    async fn claim(&self, worker_id: &str, lane: Lane, limit: i64) -> Result<Vec<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();

        let mut ready: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.lane == lane)
            .filter(|j| match j.status {
                JobStatus::Pending => j.next_run_at.map(|at| at <= now).unwrap_or(true),
                JobStatus::Running => j.lease_expires_at.map(|at| at < now).unwrap_or(false),
                _ => false,
            })
            .map(|j| j.id)
            .collect();
        ready.sort_by_key(|id| {
            let job = &jobs[id];
            job.next_run_at.unwrap_or(job.created_at)
        });
        ready.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(ready.len());
        for id in ready {
            let job = jobs.get_mut(&id).unwrap();
            job.status = JobStatus::Running;
            job.worker_id = Some(worker_id.to_string());
            job.lease_expires_at =
                Some(now + chrono::Duration::milliseconds(self.lease.as_millis() as i64));
            job.updated_at = now;
            claimed.push(job.clone());
        }

        Ok(claimed)
    }

    async fn succeed(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            bail!("unknown job {job_id}");
        };
        job.status = JobStatus::Succeeded;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn retry(&self, job_id: Uuid, error: &str, delay: Duration) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            bail!("unknown job {job_id}");
        };
        let now = Utc::now();
        job.status = JobStatus::Pending;
        job.attempt += 1;
        job.next_run_at = Some(now + chrono::Duration::milliseconds(delay.as_millis() as i64));
        job.error_message = Some(error.to_string());
        job.worker_id = None;
        job.lease_expires_at = None;
        job.updated_at = now;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            bail!("unknown job {job_id}");
        };
        job.status = JobStatus::DeadLetter;
        job.error_message = Some(error.to_string());
        job.worker_id = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn revoke(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(lane: Lane) -> JobSpec {
        JobSpec::new("target:verify", json!({}), Uuid::new_v4(), lane)
    }

    #[tokio::test]
    async fn claim_only_returns_jobs_from_the_requested_lane() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(spec(Lane::Urgent)).await.unwrap();
        queue.enqueue(spec(Lane::Weekly)).await.unwrap();

        let claimed = queue.claim("w1", Lane::Urgent, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].lane, Lane::Urgent);
    }

    #[tokio::test]
    async fn claimed_jobs_are_invisible_to_other_workers() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(spec(Lane::Standard)).await.unwrap();

        let first = queue.claim("w1", Lane::Standard, 10).await.unwrap();
        let second = queue.claim("w2", Lane::Standard, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn scheduled_jobs_are_not_claimable_before_their_time() {
        let queue = MemoryJobQueue::new();
        let run_at = Utc::now() + chrono::Duration::minutes(5);
        let id = queue
            .enqueue(spec(Lane::Weekly).scheduled_at(run_at))
            .await
            .unwrap();

        assert!(queue.claim("w1", Lane::Weekly, 10).await.unwrap().is_empty());

        queue.make_ready(id);
        assert_eq!(queue.claim("w1", Lane::Weekly, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_bumps_attempt_and_delays_the_job() {
        let queue = MemoryJobQueue::new();
        let id = queue.enqueue(spec(Lane::Standard)).await.unwrap();
        queue.claim("w1", Lane::Standard, 1).await.unwrap();

        queue
            .retry(id, "throttled", Duration::from_secs(60))
            .await
            .unwrap();

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 2);
        let delay = job.next_run_at.unwrap() - Utc::now();
        assert!(delay > chrono::Duration::seconds(58));
        assert!(delay <= chrono::Duration::seconds(60));

        // Not visible again until the delay elapses.
        assert!(queue.claim("w1", Lane::Standard, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_hits_pending_but_not_running_jobs() {
        let queue = MemoryJobQueue::new();
        let queued = queue.enqueue(spec(Lane::Standard)).await.unwrap();
        let running = queue.enqueue(spec(Lane::Standard)).await.unwrap();

        let claimed = queue.claim("w1", Lane::Standard, 1).await.unwrap();
        assert_eq!(claimed[0].id, queued);

        assert!(!queue.revoke(queued).await.unwrap()); // running now
        assert!(queue.revoke(running).await.unwrap()); // still pending

        let job = queue.get(running).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn ties_break_by_arrival_order() {
        let queue = MemoryJobQueue::new();
        let first = queue.enqueue(spec(Lane::Standard)).await.unwrap();
        let _second = queue.enqueue(spec(Lane::Standard)).await.unwrap();

        let claimed = queue.claim("w1", Lane::Standard, 1).await.unwrap();
        assert_eq!(claimed[0].id, first);
    }
}
