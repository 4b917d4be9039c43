//! Job model and lanes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Priority lane, ascending importance: weekly < standard < urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lane", rename_all = "snake_case")]
pub enum Lane {
    /// Single-site manual re-check.
    Urgent,
    /// User-triggered bulk verification or import.
    Standard,
    /// Scheduled bulk re-checks.
    Weekly,
}

impl Lane {
    /// Ordering weight for claims; lower claims first.
    pub fn weight(&self) -> i16 {
        match self {
            Lane::Urgent => 0,
            Lane::Standard => 1,
            Lane::Weekly => 2,
        }
    }

    /// Lanes in claim order, most important first.
    pub fn in_priority_order() -> [Lane; 3] {
        [Lane::Urgent, Lane::Standard, Lane::Weekly]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Urgent => "urgent",
            Lane::Standard => "standard",
            Lane::Weekly => "weekly",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    /// Attempts exhausted or failure was fatal.
    DeadLetter,
    /// Revoked before it started.
    Cancelled,
}

/// One queued unit of work.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub args: serde_json::Value,
    pub owner_id: Uuid,
    pub lane: Lane,
    pub status: JobStatus,

    /// 1-based; the attempt currently underway (or next to run).
    pub attempt: i32,
    pub max_attempts: i32,

    /// Earliest time the job may run; NULL means immediately.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Visibility timeout: a running job whose lease expired is reclaimed.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,

    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Deserialize the command payload.
    pub fn command<C: serde::de::DeserializeOwned>(&self) -> anyhow::Result<C> {
        serde_json::from_value(self.args.clone())
            .map_err(|e| anyhow::anyhow!("job {} has an unusable payload: {e}", self.id))
    }
}

/// Everything needed to enqueue a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_type: String,
    pub args: serde_json::Value,
    pub owner_id: Uuid,
    pub lane: Lane,
    pub max_attempts: i32,
    pub run_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new(
        job_type: impl Into<String>,
        args: serde_json::Value,
        owner_id: Uuid,
        lane: Lane,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            args,
            owner_id,
            lane,
            max_attempts: 5,
            run_at: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay the first run until `run_at`.
    pub fn scheduled_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }
}
