//! Backlink verification pipeline.
//!
//! Re-checks monitored backlinks in bulk: a dispatcher fans an owner's
//! targets out into per-target jobs on a three-lane priority queue, worker
//! loops drain the lanes and run the probe sequence for each target, and a
//! cron scheduler kicks off the staggered weekly sweep. External services
//! are shielded by per-service rate limiters; throttle responses defer the
//! job by the service's fixed delay while other transient failures back
//! off exponentially.

pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod probes;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod types;
pub mod worker;

pub use config::VerifierConfig;
pub use dispatch::{Dispatcher, FanOutReport, PipelineHandler};
pub use queue::{JobQueue, JobRunner, JobRunnerConfig, Lane};
pub use worker::{VerificationWorker, VerifyOutcome};
