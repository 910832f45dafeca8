//! Per-scope sessions over an injected store
//!
//! A `StagingWorkspace` owns the durable store handle and hands out one
//! shared `ScopeSession` per scope id. Nothing here is global: embedders
//! create a workspace and pass it to whatever needs staging.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::commit::{CommitCoordinator, CommitError, CommitEventHandler, CommitOutcome, CommitTransport};
use crate::config::StageConfig;
use crate::model::{NewOperation, Record, RecordPatch, ScopeId, StagedOperation, ValidationError};
use crate::projector::{project, ViewRecord};
use crate::queue::StagingQueue;
use crate::snapshot::LocalSnapshotCache;
use crate::store::ScopeStore;

pub struct StagingWorkspace {
    store: Arc<dyn ScopeStore>,
    config: StageConfig,
    sessions: Mutex<HashMap<ScopeId, Arc<ScopeSession>>>,
}

impl StagingWorkspace {
    pub fn new(store: Arc<dyn ScopeStore>, config: StageConfig) -> Self {
        Self {
            store,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Session for `scope_id`. The first call reloads the scope's queue from
    /// the store; later calls return the same session.
    pub fn open(&self, scope_id: &str) -> Arc<ScopeSession> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(scope_id) {
            return session.clone();
        }

        let session = Arc::new(ScopeSession::new(
            scope_id,
            self.store.clone(),
            self.config.clone(),
        ));
        sessions.insert(scope_id.to_string(), session.clone());
        session
    }

    /// Scope ids opened so far, sorted
    pub fn open_scopes(&self) -> Vec<ScopeId> {
        let mut scopes: Vec<ScopeId> = self.sessions.lock().keys().cloned().collect();
        scopes.sort();
        scopes
    }

    pub fn store(&self) -> Arc<dyn ScopeStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn snapshot_cache(&self) -> LocalSnapshotCache {
        LocalSnapshotCache::new(self.store.clone())
    }
}

/// Staging state and commit coordination for one scope
pub struct ScopeSession {
    scope_id: ScopeId,
    queue: Mutex<StagingQueue>,
    snapshot: LocalSnapshotCache,
    coordinator: CommitCoordinator,
}

impl ScopeSession {
    fn new(scope_id: &str, store: Arc<dyn ScopeStore>, config: StageConfig) -> Self {
        let snapshot = LocalSnapshotCache::new(store.clone());
        Self {
            scope_id: scope_id.to_string(),
            queue: Mutex::new(StagingQueue::open(scope_id, store)),
            coordinator: CommitCoordinator::new(scope_id, snapshot.clone(), config),
            snapshot,
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn stage(&self, operation: NewOperation) -> StagedOperation {
        self.queue.lock().add(operation)
    }

    /// Validate and stage an edit
    pub fn stage_edit(
        &self,
        original: Record,
        patch: RecordPatch,
    ) -> Result<StagedOperation, ValidationError> {
        Ok(self.stage(NewOperation::edit(original, patch)?))
    }

    pub fn stage_delete(&self, original: Record) -> StagedOperation {
        self.stage(NewOperation::delete(original))
    }

    pub fn unstage(&self, operation_id: &str) -> Option<StagedOperation> {
        self.queue.lock().remove(operation_id)
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Staged operations, oldest first
    pub fn pending(&self) -> Vec<StagedOperation> {
        self.queue.lock().list().to_vec()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn find_by_target(&self, target_id: &str) -> Option<StagedOperation> {
        self.queue.lock().find_by_target(target_id).cloned()
    }

    /// Effective view of `base` under the current queue
    pub fn view(&self, base: &[Record]) -> Vec<ViewRecord> {
        project(base, self.queue.lock().list())
    }

    /// Last confirmed records for this scope, if any were cached
    pub fn snapshot(&self) -> Option<Vec<Record>> {
        self.snapshot.read(&self.scope_id)
    }

    pub fn on_event(&self, handler: CommitEventHandler) {
        self.coordinator.on_event(handler);
    }

    pub fn is_committing(&self) -> bool {
        self.coordinator.is_committing()
    }

    pub async fn commit(&self, transport: &dyn CommitTransport) -> Result<CommitOutcome, CommitError> {
        self.coordinator.commit(&self.queue, transport).await
    }
}

impl std::fmt::Debug for ScopeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeSession")
            .field("scope_id", &self.scope_id)
            .field("pending", &self.pending_count())
            .field("committing", &self.is_committing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, RecordKind};
    use crate::store::MemoryScopeStore;

    fn record(id: &str, body: &str) -> Record {
        Record::new(id, body, RecordKind::Annotation, Location::open(0))
    }

    fn workspace() -> (Arc<MemoryScopeStore>, StagingWorkspace) {
        let store = Arc::new(MemoryScopeStore::new());
        let workspace = StagingWorkspace::new(store.clone(), StageConfig::default());
        (store, workspace)
    }

    #[test]
    fn open_returns_shared_session() {
        let (_store, workspace) = workspace();
        let a = workspace.open("b1");
        let b = workspace.open("b1");
        a.stage_delete(record("r1", "x"));
        assert_eq!(b.pending_count(), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(workspace.open_scopes(), vec!["b1".to_string()]);
    }

    #[test]
    fn new_workspace_reloads_queue() {
        let (store, workspace) = workspace();
        let staged = workspace
            .open("b1")
            .stage_edit(record("r1", "old"), RecordPatch::body("new"))
            .unwrap();

        let reopened = StagingWorkspace::new(store, StageConfig::default());
        assert_eq!(reopened.open("b1").pending(), vec![staged]);
    }

    #[test]
    fn invalid_edit_never_enters_queue() {
        let (store, workspace) = workspace();
        let session = workspace.open("b1");
        assert_eq!(
            session.stage_edit(record("r1", "old"), RecordPatch::body("")),
            Err(ValidationError::EmptyBody)
        );
        assert_eq!(session.pending_count(), 0);
        assert!(!store.contains("staging:b1"));
    }

    #[test]
    fn edit_then_delete_on_same_record() {
        let (_store, workspace) = workspace();
        let session = workspace.open("b1");
        let r1 = record("r1", "old");
        let base = vec![r1.clone(), record("r2", "other")];

        session
            .stage_edit(r1.clone(), RecordPatch::body("new"))
            .unwrap();
        session.stage_delete(r1);

        let pending = session.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, crate::model::OperationKind::Delete);

        let ids: Vec<String> = session.view(&base).into_iter().map(|v| v.record.id).collect();
        assert_eq!(ids, vec!["r2"]);
    }
}
