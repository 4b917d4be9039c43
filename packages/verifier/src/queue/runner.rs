//! Job runner: the worker loop that drains the lanes.
//!
//! Each runner claims jobs lane by lane in priority order, bounded by the
//! per-lane budgets, and processes what it claimed one job at a time. The
//! mapping from a job's outcome to queue bookkeeping is a pure function of
//! the outcome's failure class and the retry policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Job, JobQueue, Lane};
use crate::config::LaneBudgets;
use crate::retry::{FailureClass, RetryDecision, RetryPolicy};

/// How a job attempt ended, as reported by its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Terminal success (including no-op successes).
    Done,
    /// An external service throttled the attempt; re-run the whole job
    /// after the service's fixed delay.
    Throttled { retry_after: Duration },
}

/// Executes one claimed job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<JobOutcome>;
}

#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Identifier for lease tracking.
    pub worker_id: String,
    /// Sleep when no lane had ready jobs.
    pub poll_interval: Duration,
    /// Per-lane claim budgets for this runner.
    pub budgets: LaneBudgets,
    /// Forcible termination point for one attempt. Keep below the queue
    /// lease so a killed attempt is retried by us, not redelivered.
    pub hard_time_limit: Duration,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("runner-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(5),
            budgets: LaneBudgets::default(),
            hard_time_limit: Duration::from_secs(360),
        }
    }
}

impl JobRunnerConfig {
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// One worker loop. Run several of these for a pool.
pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    policy: RetryPolicy,
    config: JobRunnerConfig,
    shutdown: Arc<AtomicBool>,
}

impl JobRunner {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        policy: RetryPolicy,
        config: JobRunnerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            policy,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for graceful shutdown; store `true` to stop after the
    /// current job.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub async fn run(self) {
        info!(worker_id = %self.config.worker_id, "job runner starting");

        while !self.shutdown.load(Ordering::SeqCst) {
            let mut claimed = Vec::new();
            for lane in Lane::in_priority_order() {
                let budget = self.config.budgets.for_lane(lane);
                if budget <= 0 {
                    continue;
                }
                match self.queue.claim(&self.config.worker_id, lane, budget).await {
                    Ok(mut jobs) => claimed.append(&mut jobs),
                    Err(e) => {
                        error!(lane = %lane, error = %e, "failed to claim jobs");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }

            if claimed.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            debug!(count = claimed.len(), "claimed jobs");
            for job in claimed {
                if self.shutdown.load(Ordering::SeqCst) {
                    // Leave unprocessed claims to the lease recovery.
                    break;
                }
                self.process(job).await;
            }
        }

        info!(worker_id = %self.config.worker_id, "job runner stopped");
    }

    /// Run one claimed job to a terminal or requeued state.
    pub async fn process(&self, job: Job) {
        let outcome =
            tokio::time::timeout(self.config.hard_time_limit, self.handler.execute(&job)).await;

        let (class, error_msg) = match outcome {
            Ok(Ok(JobOutcome::Done)) => {
                debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempt, "job succeeded");
                if let Err(e) = self.queue.succeed(job.id).await {
                    error!(job_id = %job.id, error = %e, "failed to mark job succeeded");
                }
                return;
            }
            Ok(Ok(JobOutcome::Throttled { retry_after })) => (
                FailureClass::Throttled { retry_after },
                "external service throttled the attempt".to_string(),
            ),
            Ok(Err(e)) => (FailureClass::Transient, e.to_string()),
            Err(_) => (
                FailureClass::Transient,
                format!(
                    "hard time limit of {}s exceeded",
                    self.config.hard_time_limit.as_secs()
                ),
            ),
        };

        match self.policy.decide(class, job.attempt, job.max_attempts) {
            RetryDecision::After(delay) => {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempt,
                    delay_s = delay.as_secs(),
                    error = %error_msg,
                    "job attempt failed, requeueing"
                );
                if let Err(e) = self.queue.retry(job.id, &error_msg, delay).await {
                    error!(job_id = %job.id, error = %e, "failed to requeue job");
                }
            }
            RetryDecision::GiveUp => {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempt,
                    error = %error_msg,
                    "job failed terminally"
                );
                if let Err(e) = self.queue.fail(job.id, &error_msg).await {
                    error!(job_id = %job.id, error = %e, "failed to dead-letter job");
                }
            }
        }
    }
}
