//! Local snapshot cache
//!
//! Durable mirror of the last known-good record collection per scope.
//! Commits fold confirmed operations into it; the scope loader replaces it
//! wholesale on refresh.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{OperationKind, Record, ScopeId, StagedOperation};
use crate::store::{load_json, save_json, snapshot_key, ScopeStore, StoreError};

/// Persisted snapshot for one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(rename = "scopeId")]
    pub scope_id: ScopeId,
    pub records: Vec<Record>,
    #[serde(rename = "cachedAt")]
    pub cached_at: DateTime<Utc>,
}

impl SnapshotEntry {
    /// A TTL that runs past the end of representable time never expires.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.cached_at.checked_add_signed(ttl) {
            Some(expires_at) => expires_at > now,
            None => ttl > Duration::zero(),
        }
    }
}

#[derive(Clone)]
pub struct LocalSnapshotCache {
    store: Arc<dyn ScopeStore>,
}

impl LocalSnapshotCache {
    pub fn new(store: Arc<dyn ScopeStore>) -> Self {
        Self { store }
    }

    pub fn read(&self, scope_id: &str) -> Option<Vec<Record>> {
        self.read_entry(scope_id).map(|entry| entry.records)
    }

    pub fn read_entry(&self, scope_id: &str) -> Option<SnapshotEntry> {
        load_json(self.store.as_ref(), &snapshot_key(scope_id))
    }

    pub fn write(&self, scope_id: &str, records: Vec<Record>) -> Result<(), StoreError> {
        self.write_at(scope_id, records, Utc::now())
    }

    pub fn write_at(
        &self,
        scope_id: &str,
        records: Vec<Record>,
        cached_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let entry = SnapshotEntry {
            scope_id: scope_id.to_string(),
            records,
            cached_at,
        };
        save_json(self.store.as_ref(), &snapshot_key(scope_id), &entry)
    }

    pub fn invalidate(&self, scope_id: &str) -> Result<(), StoreError> {
        self.store.remove(&snapshot_key(scope_id))
    }
}

/// Fold server-confirmed operations into `records`.
///
/// Edits merge their patch into the matching record; deletes retire it at
/// `now`. Records are never removed. Returns how many records changed.
pub fn apply_confirmed(
    records: &mut [Record],
    confirmed: &[&StagedOperation],
    now: DateTime<Utc>,
) -> usize {
    let mut changed = 0;
    for op in confirmed {
        let Some(record) = records.iter_mut().find(|r| r.id == op.target_id) else {
            tracing::debug!(record_id = %op.target_id, "confirmed operation has no cached record");
            continue;
        };

        match (op.kind, &op.patch) {
            (OperationKind::Edit, Some(patch)) => patch.apply_to(record),
            (OperationKind::Edit, None) => continue,
            (OperationKind::Delete, _) => record.retire(now),
        }
        changed += 1;
    }
    changed
}
