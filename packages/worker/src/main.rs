//! Worker process for the backlink verification pipeline.
//!
//! `serve` runs a pool of job runners plus the weekly cron scheduler;
//! the other subcommands enqueue or cancel work and exit.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use link_verifier::config::VerifierConfig;
use link_verifier::dispatch::{Dispatcher, PipelineHandler};
use link_verifier::ledger::{cancel_owner_jobs, JobLedger, PostgresJobLedger};
use link_verifier::probes::{
    AuthorityProbe, AuthorityProbeConfig, HttpAuthorityProbe, HttpIndexProbe, HttpPageProbe,
    IndexProbe, IndexProbeConfig, PageProbe, Service, ServiceLimiter,
};
use link_verifier::queue::{JobQueue, JobRunner, JobRunnerConfig, Lane, PostgresJobQueue};
use link_verifier::scheduler::{run_weekly_sweep, start_scheduler};
use link_verifier::storage::{
    ensure_schema, PostgresSiteStore, PostgresSnapshotStore, SiteStore, SnapshotStore,
};
use link_verifier::worker::VerificationWorker;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use config::Config;

#[derive(Parser)]
#[command(name = "verifier-worker", about = "Backlink verification worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool and the weekly scheduler.
    Serve,
    /// Re-check one target on the urgent lane.
    VerifyTarget { target_id: Uuid },
    /// Fan out all of an owner's targets on the standard lane.
    VerifyOwner { owner_id: Uuid },
    /// Enqueue the weekly sweep right now instead of waiting for the cron.
    Sweep,
    /// Cancel an owner's outstanding jobs.
    CancelOwner { owner_id: Uuid },
}

struct Services {
    store: Arc<dyn SiteStore>,
    queue: Arc<dyn JobQueue>,
    ledger: Arc<dyn JobLedger>,
    dispatcher: Arc<Dispatcher>,
    worker: Arc<VerificationWorker>,
    pipeline: VerifierConfig,
}

async fn build_services(config: &Config, pipeline: VerifierConfig) -> Result<Services> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    ensure_schema(&pool).await?;

    let store: Arc<dyn SiteStore> = Arc::new(PostgresSiteStore::new(pool.clone()));
    let snapshots: Arc<dyn SnapshotStore> = Arc::new(PostgresSnapshotStore::new(pool.clone()));
    let ledger: Arc<dyn JobLedger> = Arc::new(PostgresJobLedger::new(pool.clone()));

    // Lease above the hard time limit, so a job killed by the timeout is
    // requeued by its own runner rather than redelivered mid-flight.
    let lease = pipeline.hard_time_limit + Duration::from_secs(60);
    let queue: Arc<dyn JobQueue> = Arc::new(PostgresJobQueue::new(pool, lease));

    let page: Arc<dyn PageProbe> = Arc::new(HttpPageProbe::new(Arc::new(ServiceLimiter::new(
        Service::PageFetch,
        pipeline.rate_limits.page,
    )))?);

    let mut index_config = IndexProbeConfig::new(config.search_api_key.clone());
    index_config.throttle_retry_after = pipeline.rate_limits.search_index.retry_after;
    let index: Arc<dyn IndexProbe> = Arc::new(HttpIndexProbe::new(
        index_config,
        Arc::new(ServiceLimiter::new(
            Service::SearchIndex,
            pipeline.rate_limits.search_index,
        )),
    )?);

    let mut authority_config = AuthorityProbeConfig::new(config.authority_api_key.clone());
    authority_config.throttle_retry_after = pipeline.rate_limits.authority.retry_after;
    let authority: Arc<dyn AuthorityProbe> = Arc::new(HttpAuthorityProbe::new(
        authority_config,
        Arc::new(ServiceLimiter::new(
            Service::Authority,
            pipeline.rate_limits.authority,
        )),
    )?);

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        snapshots,
        queue.clone(),
        ledger.clone(),
        pipeline.retry.max_attempts,
    ));

    let worker = Arc::new(VerificationWorker::new(
        store.clone(),
        page,
        index,
        authority,
        pipeline.soft_time_limit,
    ));

    Ok(Services {
        store,
        queue,
        ledger,
        dispatcher,
        worker,
        pipeline,
    })
}

async fn serve(services: Services, workers: usize) -> Result<()> {
    let handler = Arc::new(PipelineHandler::new(
        services.worker.clone(),
        services.dispatcher.clone(),
    ));

    let mut shutdown_handles = Vec::with_capacity(workers);
    let mut tasks = Vec::with_capacity(workers);
    for i in 0..workers {
        let runner_config = JobRunnerConfig {
            worker_id: format!("worker-{i}-{}", Uuid::new_v4()),
            poll_interval: services.pipeline.poll_interval,
            budgets: services.pipeline.lane_budgets,
            hard_time_limit: services.pipeline.hard_time_limit,
        };
        let runner = JobRunner::new(
            services.queue.clone(),
            handler.clone(),
            services.pipeline.retry,
            runner_config,
        );
        shutdown_handles.push(runner.shutdown_handle());
        tasks.push(tokio::spawn(runner.run()));
    }

    let scheduler = start_scheduler(
        services.store.clone(),
        services.dispatcher.clone(),
        services.pipeline.sweep_stagger,
    )
    .await?;

    tracing::info!(workers, "verifier worker pool running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining runners");

    for handle in &shutdown_handles {
        handle.store(true, std::sync::atomic::Ordering::SeqCst);
    }
    for task in tasks {
        let _ = task.await;
    }
    let mut scheduler = scheduler;
    scheduler.shutdown().await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,link_verifier=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pipeline = VerifierConfig {
        workers: config.workers,
        ..VerifierConfig::default()
    };

    let services = build_services(&config, pipeline).await?;

    match cli.command {
        Command::Serve => {
            let workers = services.pipeline.workers;
            serve(services, workers).await?;
        }
        Command::VerifyTarget { target_id } => {
            let job_id = services.dispatcher.dispatch_single(target_id).await?;
            println!("Enqueued urgent verification job {job_id}");
        }
        Command::VerifyOwner { owner_id } => {
            let report = services.dispatcher.fan_out(owner_id, Lane::Standard).await?;
            println!(
                "Submitted {} of {} targets ({} skipped)",
                report.submitted, report.total_targets, report.skipped
            );
        }
        Command::Sweep => {
            let enqueued = run_weekly_sweep(
                &services.store,
                &services.dispatcher,
                services.pipeline.sweep_stagger,
            )
            .await?;
            println!("Enqueued {enqueued} owner sweeps");
        }
        Command::CancelOwner { owner_id } => {
            let revoked =
                cancel_owner_jobs(services.ledger.as_ref(), &services.queue, owner_id).await?;
            println!("Revoked {revoked} pending jobs for owner {owner_id}");
        }
    }

    Ok(())
}
