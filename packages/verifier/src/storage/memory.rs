//! In-memory stores for tests and local experiments.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::{SiteStore, SnapshotStore};
use crate::types::{AuthorityMetrics, CheckUpdate, HistoryEntry, MetricsSnapshot, Target};

#[derive(Default)]
pub struct MemorySiteStore {
    targets: Mutex<HashMap<Uuid, Target>>,
    history: Mutex<Vec<HistoryEntry>>,
}

impl MemorySiteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_target(&self, target: Target) {
        self.targets.lock().unwrap().insert(target.id, target);
    }

    pub fn remove_target(&self, id: Uuid) {
        self.targets.lock().unwrap().remove(&id);
    }

    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl SiteStore for MemorySiteStore {
    async fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        Ok(self.targets.lock().unwrap().get(&id).cloned())
    }

    async fn list_targets(&self, owner_id: Uuid) -> Result<Vec<Target>> {
        let mut targets: Vec<Target> = self
            .targets
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        targets.sort_by_key(|t| t.created_at);
        Ok(targets)
    }

    async fn list_owners(&self) -> Result<Vec<Uuid>> {
        let mut owners: Vec<Uuid> = self
            .targets
            .lock()
            .unwrap()
            .values()
            .map(|t| t.owner_id)
            .collect();
        owners.sort_unstable();
        owners.dedup();
        Ok(owners)
    }

    async fn record_check(&self, prior: &Target, update: &CheckUpdate) -> Result<()> {
        let mut targets = self.targets.lock().unwrap();
        let Some(target) = targets.get_mut(&prior.id) else {
            bail!("target {} no longer exists", prior.id);
        };

        self.history
            .lock()
            .unwrap()
            .push(HistoryEntry::snapshot_of(prior));

        target.status_code = update.status_code;
        target.link_status = update.link_status;
        target.follow_status = update.follow_status;
        target.anchor_status = update.anchor_status;
        target.index_status = update.index_status;
        target.last_checked = Some(update.checked_at);
        target.first_checked = target.first_checked.or(Some(update.checked_at));
        target.updated_at = update.checked_at;

        Ok(())
    }

    async fn apply_metrics(&self, target_id: Uuid, metrics: &AuthorityMetrics) -> Result<()> {
        let mut targets = self.targets.lock().unwrap();
        let Some(target) = targets.get_mut(&target_id) else {
            bail!("target {target_id} no longer exists");
        };

        target.page_value = metrics.page_value;
        target.page_trust = metrics.page_trust;
        target.authority_score = metrics.authority_score;
        target.backlinks_external = metrics.backlinks_external;
        target.outlinks_external = metrics.outlinks_external;

        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<Vec<MetricsSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<MetricsSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn append(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}
