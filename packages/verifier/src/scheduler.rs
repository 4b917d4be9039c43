//! Weekly sweep scheduling.
//!
//! Every Monday at midnight the sweep walks all owners and enqueues one
//! deferred fan-out job per owner, staggered so the fan-outs do not land
//! on the external services at the same instant.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::storage::SiteStore;

const WEEKLY_SWEEP_CRON: &str = "0 0 0 * * MON";

/// Enqueue one staggered fan-out job per owner.
///
/// Owner `i` is scheduled at `now + i * stagger`. A failure for one owner
/// is logged and the sweep moves on; the number of jobs enqueued is
/// returned.
pub async fn run_weekly_sweep(
    store: &Arc<dyn SiteStore>,
    dispatcher: &Arc<Dispatcher>,
    stagger: Duration,
) -> Result<usize> {
    let owners = store.list_owners().await?;
    info!(owners = owners.len(), "starting weekly sweep");

    let now = Utc::now();
    let stagger = chrono::Duration::milliseconds(stagger.as_millis() as i64);

    let mut enqueued = 0;
    for (i, owner_id) in owners.iter().enumerate() {
        let run_at = now + stagger * i as i32;
        match dispatcher.enqueue_owner_sweep(*owner_id, run_at).await {
            Ok(job_id) => {
                info!(owner_id = %owner_id, job_id = %job_id, run_at = %run_at, "enqueued owner sweep");
                enqueued += 1;
            }
            Err(e) => {
                warn!(owner_id = %owner_id, error = %e, "failed to enqueue owner sweep");
            }
        }
    }

    info!(enqueued, "weekly sweep finished");
    Ok(enqueued)
}

/// Start the cron scheduler with the weekly sweep registered.
pub async fn start_scheduler(
    store: Arc<dyn SiteStore>,
    dispatcher: Arc<Dispatcher>,
    stagger: Duration,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sweep_job = Job::new_async(WEEKLY_SWEEP_CRON, move |_uuid, _lock| {
        let store = store.clone();
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            if let Err(e) = run_weekly_sweep(&store, &dispatcher, stagger).await {
                error!(error = %e, "weekly sweep failed");
            }
        })
    })?;

    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    info!("scheduler started (weekly sweep every Monday at midnight)");
    Ok(scheduler)
}
