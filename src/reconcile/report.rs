use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::store::Change;

/// Outcome of one successful reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub products_scanned: u32,
    #[serde(default)]
    pub inventory_inserted: u32,
    #[serde(default)]
    pub inventory_updated: u32,
    #[serde(default)]
    pub inventory_deleted: u32,
    #[serde(default)]
    pub archived_upserted: u32,
    #[serde(default)]
    pub archived_deleted: u32,
    #[serde(default)]
    pub products_marked: u32,
    /// Changes rolled back to their savepoint after a row-level failure.
    #[serde(default)]
    pub skipped: u32,
    pub duration_ms: u64,
}

impl ReconcileReport {
    pub(crate) fn begin(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            products_scanned: 0,
            inventory_inserted: 0,
            inventory_updated: 0,
            inventory_deleted: 0,
            archived_upserted: 0,
            archived_deleted: 0,
            products_marked: 0,
            skipped: 0,
            duration_ms: 0,
        }
    }

    /// Count a change that was applied.
    pub(crate) fn record(&mut self, change: &Change) {
        let counter = match change {
            Change::InsertInventory(_) => &mut self.inventory_inserted,
            Change::UpdateInventory(_) => &mut self.inventory_updated,
            Change::DeleteInventory { .. } => &mut self.inventory_deleted,
            Change::UpsertArchived(_) => &mut self.archived_upserted,
            Change::DeleteArchived { .. } => &mut self.archived_deleted,
            Change::MarkProduct { .. } => &mut self.products_marked,
        };
        *counter += 1;
    }

    pub(crate) fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Number of changes written.
    pub fn applied(&self) -> u32 {
        self.inventory_inserted
            + self.inventory_updated
            + self.inventory_deleted
            + self.archived_upserted
            + self.archived_deleted
            + self.products_marked
    }

    /// True when the derived tables were already in line.
    pub fn is_noop(&self) -> bool {
        self.applied() == 0 && self.skipped == 0
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}
