//! Job fan-out and the pipeline's job handler.
//!
//! The dispatcher turns owner-level requests into per-target verification
//! jobs and records each one in the ledger. Fan-out for an owner also
//! appends exactly one metrics snapshot reflecting the owner's state before
//! the new round of checks runs.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::JobLedger;
use crate::queue::{JobHandler, JobOutcome, JobQueue, JobSpec, Lane};
use crate::storage::{SiteStore, SnapshotStore};
use crate::types::MetricsSnapshot;
use crate::worker::{is_verifiable, VerificationWorker, VerifyOutcome};

/// Job type for verifying a single target.
pub const JOB_VERIFY_TARGET: &str = "target:verify";
/// Job type for fanning out all of an owner's targets.
pub const JOB_OWNER_FANOUT: &str = "owner:fanout";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerifyTargetCommand {
    pub target_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OwnerFanOutCommand {
    pub owner_id: Uuid,
    pub lane: Lane,
}

/// What one fan-out produced.
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    pub total_targets: usize,
    pub submitted: usize,
    pub skipped: usize,
    pub job_ids: Vec<Uuid>,
}

pub struct Dispatcher {
    store: Arc<dyn SiteStore>,
    snapshots: Arc<dyn SnapshotStore>,
    queue: Arc<dyn JobQueue>,
    ledger: Arc<dyn JobLedger>,
    max_attempts: i32,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn SiteStore>,
        snapshots: Arc<dyn SnapshotStore>,
        queue: Arc<dyn JobQueue>,
        ledger: Arc<dyn JobLedger>,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            snapshots,
            queue,
            ledger,
            max_attempts,
        }
    }

    /// Enqueue one verification job per target of `owner_id` on `lane`.
    ///
    /// Targets without a usable source URL are skipped, as are targets
    /// whose enqueue fails; neither stops the rest of the batch. A failure
    /// to load the target list aborts before anything is enqueued.
    pub async fn fan_out(&self, owner_id: Uuid, lane: Lane) -> Result<FanOutReport> {
        let targets = self.store.list_targets(owner_id).await?;

        let mut report = FanOutReport {
            total_targets: targets.len(),
            ..Default::default()
        };

        for target in &targets {
            if !is_verifiable(target) {
                warn!(target_id = %target.id, "skipping target without a source url");
                report.skipped += 1;
                continue;
            }

            let spec = JobSpec::new(
                JOB_VERIFY_TARGET,
                serde_json::to_value(VerifyTargetCommand { target_id: target.id })?,
                owner_id,
                lane,
            )
            .with_max_attempts(self.max_attempts);

            match self.queue.enqueue(spec).await {
                Ok(job_id) => match self.ledger.record(job_id, owner_id).await {
                    Ok(()) => {
                        report.job_ids.push(job_id);
                        report.submitted += 1;
                    }
                    Err(e) => {
                        warn!(
                            target_id = %target.id,
                            job_id = %job_id,
                            error = %e,
                            "failed to record verification job in the ledger"
                        );
                        report.skipped += 1;
                    }
                },
                Err(e) => {
                    warn!(target_id = %target.id, error = %e, "failed to enqueue verification job");
                    report.skipped += 1;
                }
            }
        }

        // One snapshot per fan-out, taken before the new results land.
        let snapshot = MetricsSnapshot::from_targets(owner_id, &targets);
        self.snapshots.append(&snapshot).await?;

        info!(
            owner_id = %owner_id,
            lane = %lane,
            total = report.total_targets,
            submitted = report.submitted,
            skipped = report.skipped,
            "fanned out verification jobs"
        );

        Ok(report)
    }

    /// Enqueue an urgent re-check of one target.
    pub async fn dispatch_single(&self, target_id: Uuid) -> Result<Uuid> {
        let Some(target) = self.store.get_target(target_id).await? else {
            bail!("target {target_id} not found");
        };
        if !is_verifiable(&target) {
            bail!("target {target_id} has no source url to verify");
        }

        let spec = JobSpec::new(
            JOB_VERIFY_TARGET,
            serde_json::to_value(VerifyTargetCommand { target_id })?,
            target.owner_id,
            Lane::Urgent,
        )
        .with_max_attempts(self.max_attempts);

        let job_id = self.queue.enqueue(spec).await?;
        self.ledger.record(job_id, target.owner_id).await?;

        info!(target_id = %target_id, job_id = %job_id, "dispatched urgent verification");
        Ok(job_id)
    }

    /// Enqueue a deferred fan-out for one owner on the weekly lane.
    ///
    /// The fan-out itself runs once; the per-target jobs it creates carry
    /// their own retries.
    pub async fn enqueue_owner_sweep(
        &self,
        owner_id: Uuid,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let spec = JobSpec::new(
            JOB_OWNER_FANOUT,
            serde_json::to_value(OwnerFanOutCommand {
                owner_id,
                lane: Lane::Weekly,
            })?,
            owner_id,
            Lane::Weekly,
        )
        .with_max_attempts(1)
        .scheduled_at(run_at);

        let job_id = self.queue.enqueue(spec).await?;
        self.ledger.record(job_id, owner_id).await?;

        Ok(job_id)
    }
}

/// Routes claimed jobs to the verification worker or the dispatcher.
pub struct PipelineHandler {
    worker: Arc<VerificationWorker>,
    dispatcher: Arc<Dispatcher>,
}

impl PipelineHandler {
    pub fn new(worker: Arc<VerificationWorker>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { worker, dispatcher }
    }
}

#[async_trait::async_trait]
impl JobHandler for PipelineHandler {
    async fn execute(&self, job: &crate::queue::Job) -> Result<JobOutcome> {
        match job.job_type.as_str() {
            JOB_VERIFY_TARGET => {
                let cmd: VerifyTargetCommand = job.command()?;
                match self.worker.verify(cmd.target_id).await? {
                    VerifyOutcome::Completed
                    | VerifyOutcome::MetricsSkipped
                    | VerifyOutcome::TargetGone => Ok(JobOutcome::Done),
                    VerifyOutcome::MetricsDeferred { retry_after } => {
                        Ok(JobOutcome::Throttled { retry_after })
                    }
                }
            }
            JOB_OWNER_FANOUT => {
                let cmd: OwnerFanOutCommand = job.command()?;
                self.dispatcher.fan_out(cmd.owner_id, cmd.lane).await?;
                Ok(JobOutcome::Done)
            }
            other => bail!("unknown job type {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{JobLedger, MemoryJobLedger};
    use crate::queue::MemoryJobQueue;
    use crate::storage::{MemorySiteStore, MemorySnapshotStore};
    use crate::types::Target;

    fn dispatcher(
        store: Arc<MemorySiteStore>,
        snapshots: Arc<MemorySnapshotStore>,
        queue: Arc<MemoryJobQueue>,
        ledger: Arc<MemoryJobLedger>,
    ) -> Dispatcher {
        Dispatcher::new(store, snapshots, queue, ledger, 5)
    }

    fn seeded(owner: Uuid, store: &MemorySiteStore, n: usize) -> Vec<Uuid> {
        (0..n)
            .map(|i| {
                let t = Target::new(
                    owner,
                    format!("https://blog{i}.example.com/post"),
                    "https://client.example.com/",
                    "client",
                );
                let id = t.id;
                store.insert_target(t);
                id
            })
            .collect()
    }

    #[tokio::test]
    async fn fan_out_submits_one_job_per_verifiable_target() {
        let owner = Uuid::new_v4();
        let store = Arc::new(MemorySiteStore::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let ledger = Arc::new(MemoryJobLedger::new());

        seeded(owner, &store, 3);
        let mut blank = Target::new(owner, "https://x.example.com/", "https://c.com/", "c");
        blank.source_url = String::new();
        store.insert_target(blank);

        let d = dispatcher(store, snapshots.clone(), queue.clone(), ledger.clone());
        let report = d.fan_out(owner, Lane::Standard).await.unwrap();

        assert_eq!(report.total_targets, 4);
        assert_eq!(report.submitted, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.job_ids.len(), 3);

        let jobs = queue.all_jobs();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.lane == Lane::Standard));
        assert!(jobs.iter().all(|j| j.job_type == JOB_VERIFY_TARGET));

        assert_eq!(ledger.for_owner(owner).await.unwrap().len(), 3);
        assert_eq!(snapshots.snapshots().len(), 1);
        assert_eq!(snapshots.snapshots()[0].total_targets, 4);
    }

    /// Fails the first `failures` record calls, then behaves normally.
    struct FlakyLedger {
        inner: MemoryJobLedger,
        failures: std::sync::atomic::AtomicUsize,
    }

    impl FlakyLedger {
        fn failing_once() -> Self {
            Self {
                inner: MemoryJobLedger::new(),
                failures: std::sync::atomic::AtomicUsize::new(1),
            }
        }
    }

    #[async_trait::async_trait]
    impl crate::ledger::JobLedger for FlakyLedger {
        async fn record(&self, job_id: Uuid, owner_id: Uuid) -> anyhow::Result<()> {
            if self
                .failures
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |n| n.checked_sub(1),
                )
                .is_ok()
            {
                anyhow::bail!("ledger write refused");
            }
            self.inner.record(job_id, owner_id).await
        }

        async fn for_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
            self.inner.for_owner(owner_id).await
        }

        async fn delete_for_owner(&self, owner_id: Uuid) -> anyhow::Result<u64> {
            self.inner.delete_for_owner(owner_id).await
        }
    }

    #[tokio::test]
    async fn a_ledger_write_failure_skips_that_target_but_not_the_rest() {
        let owner = Uuid::new_v4();
        let store = Arc::new(MemorySiteStore::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let ledger = Arc::new(FlakyLedger::failing_once());

        seeded(owner, &store, 3);
        let d = Dispatcher::new(store, snapshots.clone(), queue.clone(), ledger.clone(), 5);

        let report = d.fan_out(owner, Lane::Standard).await.unwrap();
        assert_eq!(report.total_targets, 3);
        assert_eq!(report.submitted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.job_ids.len(), 2);

        // Only the tracked jobs are in the ledger; the snapshot still lands.
        assert_eq!(ledger.for_owner(owner).await.unwrap().len(), 2);
        assert_eq!(snapshots.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn fan_out_of_an_owner_without_targets_still_snapshots() {
        let owner = Uuid::new_v4();
        let store = Arc::new(MemorySiteStore::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let ledger = Arc::new(MemoryJobLedger::new());

        let d = dispatcher(store, snapshots.clone(), queue.clone(), ledger);
        let report = d.fan_out(owner, Lane::Weekly).await.unwrap();

        assert_eq!(report.submitted, 0);
        assert!(queue.all_jobs().is_empty());
        assert_eq!(snapshots.snapshots().len(), 1);
        assert_eq!(snapshots.snapshots()[0].total_targets, 0);
    }

    #[tokio::test]
    async fn dispatch_single_uses_the_urgent_lane() {
        let owner = Uuid::new_v4();
        let store = Arc::new(MemorySiteStore::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let ledger = Arc::new(MemoryJobLedger::new());

        let ids = seeded(owner, &store, 1);
        let d = dispatcher(store, snapshots, queue.clone(), ledger.clone());

        let job_id = d.dispatch_single(ids[0]).await.unwrap();
        let job = queue.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.lane, Lane::Urgent);
        assert_eq!(job.owner_id, owner);
        assert_eq!(ledger.for_owner(owner).await.unwrap(), vec![job_id]);
    }

    #[tokio::test]
    async fn dispatch_single_rejects_unknown_targets() {
        let store = Arc::new(MemorySiteStore::new());
        let d = dispatcher(
            store,
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(MemoryJobQueue::new()),
            Arc::new(MemoryJobLedger::new()),
        );

        assert!(d.dispatch_single(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn owner_sweep_is_a_single_attempt_weekly_job() {
        let owner = Uuid::new_v4();
        let queue = Arc::new(MemoryJobQueue::new());
        let d = dispatcher(
            Arc::new(MemorySiteStore::new()),
            Arc::new(MemorySnapshotStore::new()),
            queue.clone(),
            Arc::new(MemoryJobLedger::new()),
        );

        let run_at = Utc::now() + chrono::Duration::minutes(10);
        let job_id = d.enqueue_owner_sweep(owner, run_at).await.unwrap();

        let job = queue.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.job_type, JOB_OWNER_FANOUT);
        assert_eq!(job.lane, Lane::Weekly);
        assert_eq!(job.max_attempts, 1);
        assert_eq!(job.next_run_at, Some(run_at));
    }
}
