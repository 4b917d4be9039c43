//! Persistence seams for the pipeline.
//!
//! The core reads and writes targets through [`SiteStore`] and appends
//! rollups through [`SnapshotStore`]; both have Postgres implementations
//! and in-memory doubles for tests.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{AuthorityMetrics, CheckUpdate, MetricsSnapshot, Target};

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::{MemorySiteStore, MemorySnapshotStore};
pub use postgres::{PostgresSiteStore, PostgresSnapshotStore};
pub use schema::ensure_schema;

/// CRUD-free view of the target records the pipeline needs.
#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn get_target(&self, id: Uuid) -> Result<Option<Target>>;

    async fn list_targets(&self, owner_id: Uuid) -> Result<Vec<Target>>;

    /// Every owner that currently has at least one target.
    async fn list_owners(&self) -> Result<Vec<Uuid>>;

    /// Commit one verification attempt's non-metric results.
    ///
    /// Inserts a history snapshot of `prior` and applies `update` to the
    /// live row in a single transaction; `last_checked` is set to the
    /// update's timestamp and `first_checked` only if still empty.
    async fn record_check(&self, prior: &Target, update: &CheckUpdate) -> Result<()>;

    /// Apply authority metrics. Called only on a successful metrics probe;
    /// failed probes leave the previous metric values untouched.
    async fn apply_metrics(&self, target_id: Uuid, metrics: &AuthorityMetrics) -> Result<()>;
}

/// Append-only store of per-owner metrics rollups.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn append(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}
