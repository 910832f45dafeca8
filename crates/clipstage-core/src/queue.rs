//! Staging queue
//!
//! Ordered, de-duplicated pending operations for one scope. Every mutating
//! call writes the whole queue through to the scope store.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::model::{NewOperation, OperationId, ScopeId, StagedOperation};
use crate::store::{load_json, save_json, staging_key, ScopeStore};

/// Pending operations for one scope, oldest first.
///
/// At most one operation exists per target record; staging a new intent for
/// a target replaces the previous one and moves it to the back.
pub struct StagingQueue {
    scope_id: ScopeId,
    operations: Vec<StagedOperation>,
    store: Arc<dyn ScopeStore>,
}

impl StagingQueue {
    /// Open the queue for `scope_id`, reloading whatever was persisted.
    pub fn open(scope_id: impl Into<ScopeId>, store: Arc<dyn ScopeStore>) -> Self {
        let scope_id = scope_id.into();
        let operations: Vec<StagedOperation> =
            load_json(store.as_ref(), &staging_key(&scope_id)).unwrap_or_default();

        if !operations.is_empty() {
            tracing::debug!(
                scope = %scope_id,
                count = operations.len(),
                "reloaded staged operations"
            );
        }

        Self {
            scope_id,
            operations,
            store,
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// Stage an intent, replacing any operation already staged for the same
    /// target.
    pub fn add(&mut self, operation: NewOperation) -> StagedOperation {
        self.add_at(operation, Utc::now())
    }

    /// `add` with an explicit staging time
    pub fn add_at(&mut self, operation: NewOperation, staged_at: DateTime<Utc>) -> StagedOperation {
        let staged = StagedOperation::stage(operation, staged_at);

        let before = self.operations.len();
        self.operations.retain(|op| op.target_id != staged.target_id);
        if self.operations.len() != before {
            tracing::debug!(
                scope = %self.scope_id,
                record_id = %staged.target_id,
                "replacing previously staged operation"
            );
        }

        self.operations.push(staged.clone());
        self.persist();

        tracing::debug!(
            scope = %self.scope_id,
            operation = %staged.id,
            kind = %staged.kind,
            "staged operation"
        );
        staged
    }

    /// Unstage by operation id. Absent ids are a no-op.
    pub fn remove(&mut self, operation_id: &str) -> Option<StagedOperation> {
        let removed = self
            .operations
            .iter()
            .position(|op| op.id == operation_id)
            .map(|idx| self.operations.remove(idx));
        self.persist();
        removed
    }

    /// Drop every operation and delete the persisted entry.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.forget();
    }

    /// Remove exactly the given operations, e.g. the ones a commit captured.
    ///
    /// Operations staged after the capture are kept. When nothing is left the
    /// persisted entry is deleted, as with `clear`.
    pub fn retire(&mut self, operation_ids: &[OperationId]) -> usize {
        let before = self.operations.len();
        self.operations
            .retain(|op| !operation_ids.iter().any(|id| *id == op.id));
        let retired = before - self.operations.len();

        if self.operations.is_empty() {
            self.forget();
        } else {
            self.persist();
        }
        retired
    }

    pub fn find_by_target(&self, target_id: &str) -> Option<&StagedOperation> {
        self.operations.iter().find(|op| op.target_id == target_id)
    }

    pub fn list(&self) -> &[StagedOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn persist(&self) {
        let key = staging_key(&self.scope_id);
        if let Err(err) = save_json(self.store.as_ref(), &key, &self.operations) {
            tracing::warn!(scope = %self.scope_id, error = %err, "failed to persist staging queue");
        }
    }

    fn forget(&self) {
        let key = staging_key(&self.scope_id);
        if let Err(err) = self.store.remove(&key) {
            tracing::warn!(scope = %self.scope_id, error = %err, "failed to remove staging queue");
        }
    }
}

impl std::fmt::Debug for StagingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingQueue")
            .field("scope_id", &self.scope_id)
            .field("operations", &self.operations)
            .finish()
    }
}
