//! Commit coordination
//!
//! Sends a scope's staged operations as one batch, folds the confirmed ones
//! into the local snapshot and decides what stays staged afterwards.
//!
//! ```text
//! capture queue ──► submit (bounded) ──► transport error ──► queue untouched
//!                                  └──► CommitResult ──► snapshot deltas
//!                                                      ├─► retire captured ops
//!                                                      └─► failure notices
//! ```

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{QueueRetention, StageConfig};
use crate::model::{truncate_chars, OperationId, OperationKind, RecordId, ScopeId, StagedOperation};
use crate::queue::StagingQueue;
use crate::snapshot::{apply_confirmed, LocalSnapshotCache};

// ============================================================================
// Wire Types
// ============================================================================

/// One batch submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub scope_id: ScopeId,
    pub operations: Vec<StagedOperation>,
}

/// Acknowledgement of one operation the backend applied.
///
/// Backends identify items by operation id, by target id, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationAck {
    #[serde(rename = "operationId", alias = "id", default)]
    pub operation_id: Option<OperationId>,
    #[serde(rename = "targetId", alias = "highlightId", default)]
    pub target_id: Option<RecordId>,
    #[serde(alias = "type", default)]
    pub kind: Option<OperationKind>,
}

/// One operation the backend rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationFailure {
    #[serde(rename = "operationId", alias = "id", default)]
    pub operation_id: Option<OperationId>,
    #[serde(rename = "targetId", alias = "highlightId", default)]
    pub target_id: Option<RecordId>,
    #[serde(alias = "type", default)]
    pub kind: Option<OperationKind>,
    #[serde(alias = "error", default, deserialize_with = "null_as_empty")]
    pub reason: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parsed batch response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    #[serde(default)]
    pub successful: Vec<OperationAck>,
    #[serde(default)]
    pub failed: Vec<OperationFailure>,
}

// ============================================================================
// Transport
// ============================================================================

/// Failure to get a parsed response at all
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Commit timed out after {after:?}")]
    TimedOut { after: Duration },
}

/// The batch-update collaborator
#[async_trait]
pub trait CommitTransport: Send + Sync {
    async fn submit(&self, request: &CommitRequest) -> Result<CommitResult, TransportError>;
}

// ============================================================================
// Errors, Events, Outcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommitError {
    #[error("Nothing staged to commit")]
    EmptyQueue,

    #[error("A commit is already in flight for this scope")]
    InProgress,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CommitError {
    /// Whether the same commit may succeed if the user tries again. The
    /// queue is intact in every retryable case.
    pub fn is_retryable(&self) -> bool {
        match self {
            CommitError::EmptyQueue => false,
            CommitError::InProgress => true,
            CommitError::Transport(TransportError::Status { status, .. }) => {
                *status >= 500 || *status == 408 || *status == 429
            }
            CommitError::Transport(_) => true,
        }
    }
}

/// What a user is told about one rejected operation
#[derive(Debug, Clone, PartialEq)]
pub struct FailureNotice {
    pub operation_id: Option<OperationId>,
    pub target_id: Option<RecordId>,
    pub kind: Option<OperationKind>,
    /// Body text of the record as it was before staging, when the failure
    /// could be matched to a submitted operation
    pub preview: Option<String>,
    /// Body text a rejected edit tried to set
    pub attempted: Option<String>,
    pub reason: String,
}

impl FailureNotice {
    /// One-line notification text
    pub fn message(&self) -> String {
        let kind = self.kind.map(|k| k.as_str()).unwrap_or("operation");
        match &self.preview {
            Some(preview) => format!("Failed to {kind} \"{preview}\": {}", self.reason),
            None => format!("Failed to {kind}: {}", self.reason),
        }
    }
}

/// Events emitted during a commit
#[derive(Debug, Clone)]
pub enum CommitEvent {
    Started {
        scope_id: ScopeId,
        operation_count: usize,
    },
    Committed {
        scope_id: ScopeId,
        success_count: usize,
        total_count: usize,
    },
    OperationFailed(FailureNotice),
    TransportFailed {
        scope_id: ScopeId,
        error: TransportError,
    },
}

/// Event handler callback
pub type CommitEventHandler = Box<dyn Fn(CommitEvent) + Send + Sync>;

type SharedHandler = Arc<dyn Fn(CommitEvent) + Send + Sync>;

/// Summary of a commit that received a response
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub scope_id: ScopeId,
    pub success_count: usize,
    pub total_count: usize,
    pub failures: Vec<FailureNotice>,
}

impl CommitOutcome {
    pub fn is_complete(&self) -> bool {
        self.success_count == self.total_count && self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.is_complete() {
            format!("Successfully updated {} highlights", self.success_count)
        } else {
            format!(
                "Updated {} of {} highlights",
                self.success_count, self.total_count
            )
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Holds the in-flight flag while a commit runs. Dropping it, including
/// when the commit future is cancelled, releases the flag.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Commits one scope's queue. At most one commit runs at a time.
pub struct CommitCoordinator {
    scope_id: ScopeId,
    config: StageConfig,
    snapshot: LocalSnapshotCache,
    in_flight: AtomicBool,
    handlers: RwLock<Vec<SharedHandler>>,
}

impl CommitCoordinator {
    pub fn new(scope_id: impl Into<ScopeId>, snapshot: LocalSnapshotCache, config: StageConfig) -> Self {
        Self {
            scope_id: scope_id.into(),
            config,
            snapshot,
            in_flight: AtomicBool::new(false),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// Register an event handler
    pub fn on_event(&self, handler: CommitEventHandler) {
        self.handlers.write().push(Arc::from(handler));
    }

    /// Handlers run outside the lock and may register further handlers;
    /// those only see later events.
    fn emit(&self, event: CommitEvent) {
        let handlers: Vec<SharedHandler> = self.handlers.read().clone();
        for handler in &handlers {
            handler(event.clone());
        }
    }

    pub fn is_committing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit everything staged in `queue` as one batch.
    ///
    /// The operation list is captured when the call starts; operations
    /// staged while the request is outstanding stay queued for the next
    /// commit. A transport failure leaves the queue exactly as it was.
    pub async fn commit(
        &self,
        queue: &Mutex<StagingQueue>,
        transport: &dyn CommitTransport,
    ) -> Result<CommitOutcome, CommitError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::debug!(scope = %self.scope_id, "commit rejected, another is in flight");
            return Err(CommitError::InProgress);
        };

        let captured: Vec<StagedOperation> = queue.lock().list().to_vec();
        if captured.is_empty() {
            return Err(CommitError::EmptyQueue);
        }

        tracing::info!(
            scope = %self.scope_id,
            operations = captured.len(),
            "committing staged operations"
        );
        self.emit(CommitEvent::Started {
            scope_id: self.scope_id.clone(),
            operation_count: captured.len(),
        });

        let request = CommitRequest {
            scope_id: self.scope_id.clone(),
            operations: captured,
        };

        let timeout = self.config.commit_timeout();
        let response = match tokio::time::timeout(timeout, transport.submit(&request)).await {
            Ok(response) => response,
            Err(_) => Err(TransportError::TimedOut { after: timeout }),
        };

        match response {
            Ok(result) => Ok(self.reconcile(queue, request.operations, result)),
            Err(error) => {
                tracing::warn!(
                    scope = %self.scope_id,
                    error = %error,
                    "commit failed before a response, keeping staged operations"
                );
                self.emit(CommitEvent::TransportFailed {
                    scope_id: self.scope_id.clone(),
                    error: error.clone(),
                });
                Err(CommitError::Transport(error))
            }
        }
    }

    fn reconcile(
        &self,
        queue: &Mutex<StagingQueue>,
        captured: Vec<StagedOperation>,
        result: CommitResult,
    ) -> CommitOutcome {
        let mut confirmed: Vec<&StagedOperation> = Vec::new();
        for ack in &result.successful {
            match resolve(&captured, ack.operation_id.as_deref(), ack.target_id.as_deref()) {
                Some(op) if !confirmed.iter().any(|c| c.id == op.id) => confirmed.push(op),
                Some(_) => {}
                None => tracing::warn!(
                    scope = %self.scope_id,
                    operation = ?ack.operation_id,
                    record_id = ?ack.target_id,
                    "acknowledgement does not match a submitted operation"
                ),
            }
        }

        if let Some(entry) = self.snapshot.read_entry(&self.scope_id) {
            let mut records = entry.records;
            let changed = apply_confirmed(&mut records, &confirmed, Utc::now());
            if changed > 0 {
                if let Err(err) = self.snapshot.write_at(&self.scope_id, records, entry.cached_at) {
                    tracing::warn!(scope = %self.scope_id, error = %err, "failed to update snapshot");
                }
            }
        } else if !confirmed.is_empty() {
            tracing::debug!(scope = %self.scope_id, "no snapshot to reconcile confirmed operations into");
        }

        let retired: Vec<OperationId> = match self.config.queue_retention {
            QueueRetention::ClearAll => captured.iter().map(|op| op.id.clone()).collect(),
            QueueRetention::RetainFailed => confirmed.iter().map(|op| op.id.clone()).collect(),
        };
        queue.lock().retire(&retired);

        let failures: Vec<FailureNotice> = result
            .failed
            .iter()
            .map(|failure| {
                let op = resolve(
                    &captured,
                    failure.operation_id.as_deref(),
                    failure.target_id.as_deref(),
                );
                FailureNotice {
                    operation_id: failure
                        .operation_id
                        .clone()
                        .or_else(|| op.map(|op| op.id.clone())),
                    target_id: failure
                        .target_id
                        .clone()
                        .or_else(|| op.map(|op| op.target_id.clone())),
                    kind: failure.kind.or_else(|| op.map(|op| op.kind)),
                    preview: op.map(|op| op.original_preview(self.config.preview_chars)),
                    attempted: op
                        .and_then(|op| op.patch.as_ref())
                        .and_then(|patch| patch.body.as_deref())
                        .map(|body| truncate_chars(body, self.config.preview_chars)),
                    reason: if failure.reason.is_empty() {
                        "Unknown error".to_string()
                    } else {
                        failure.reason.clone()
                    },
                }
            })
            .collect();

        for notice in &failures {
            tracing::warn!(
                scope = %self.scope_id,
                operation = ?notice.operation_id,
                reason = %notice.reason,
                "backend rejected staged operation"
            );
            self.emit(CommitEvent::OperationFailed(notice.clone()));
        }

        let outcome = CommitOutcome {
            scope_id: self.scope_id.clone(),
            success_count: confirmed.len(),
            total_count: captured.len(),
            failures,
        };

        tracing::info!(
            scope = %self.scope_id,
            succeeded = outcome.success_count,
            total = outcome.total_count,
            "commit completed"
        );
        self.emit(CommitEvent::Committed {
            scope_id: self.scope_id.clone(),
            success_count: outcome.success_count,
            total_count: outcome.total_count,
        });

        outcome
    }
}

impl std::fmt::Debug for CommitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitCoordinator")
            .field("scope_id", &self.scope_id)
            .field("in_flight", &self.is_committing())
            .finish()
    }
}

/// Match a response item to a submitted operation, by operation id first
/// and by target otherwise. Targets are unique within one batch.
fn resolve<'a>(
    captured: &'a [StagedOperation],
    operation_id: Option<&str>,
    target_id: Option<&str>,
) -> Option<&'a StagedOperation> {
    operation_id
        .and_then(|id| captured.iter().find(|op| op.id == id))
        .or_else(|| target_id.and_then(|t| captured.iter().find(|op| op.target_id == t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, NewOperation, Record, RecordKind, RecordPatch};
    use crate::store::MemoryScopeStore;
    use std::sync::Arc;

    struct Fixed(Result<CommitResult, TransportError>);

    #[async_trait]
    impl CommitTransport for Fixed {
        async fn submit(&self, _request: &CommitRequest) -> Result<CommitResult, TransportError> {
            self.0.clone()
        }
    }

    fn record(id: &str) -> Record {
        Record::new(id, format!("body of {id}"), RecordKind::Annotation, Location::open(0))
    }

    fn setup() -> (CommitCoordinator, Mutex<StagingQueue>) {
        let store = Arc::new(MemoryScopeStore::new());
        let coordinator =
            CommitCoordinator::new("b", LocalSnapshotCache::new(store.clone()), StageConfig::default());
        (coordinator, Mutex::new(StagingQueue::open("b", store)))
    }

    #[test]
    fn response_items_accept_backend_aliases() {
        let json = r#"{
            "successful": [{ "id": "edit_r1_1", "highlightId": "r1", "type": "edit" }],
            "failed": [{ "highlightId": "r2", "error": "not found" }]
        }"#;
        let result: CommitResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.successful[0].operation_id.as_deref(), Some("edit_r1_1"));
        assert_eq!(result.successful[0].kind, Some(OperationKind::Edit));
        assert_eq!(result.failed[0].target_id.as_deref(), Some("r2"));
        assert_eq!(result.failed[0].reason, "not found");
    }

    #[test]
    fn request_uses_camel_case() {
        let request = CommitRequest {
            scope_id: "b".into(),
            operations: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["scopeId"], "b");
    }

    #[test]
    fn summary_wording() {
        let mut outcome = CommitOutcome {
            scope_id: "b".into(),
            success_count: 2,
            total_count: 2,
            failures: vec![],
        };
        assert_eq!(outcome.summary(), "Successfully updated 2 highlights");
        outcome.success_count = 1;
        assert_eq!(outcome.summary(), "Updated 1 of 2 highlights");
    }

    #[test]
    fn retryability() {
        assert!(!CommitError::EmptyQueue.is_retryable());
        assert!(CommitError::from(TransportError::Network("reset".into())).is_retryable());
        assert!(!CommitError::from(TransportError::Status {
            status: 400,
            message: "bad".into()
        })
        .is_retryable());
    }

    #[tokio::test]
    async fn empty_queue_is_rejected() {
        let (coordinator, queue) = setup();
        let transport = Fixed(Ok(CommitResult::default()));
        assert_eq!(
            coordinator.commit(&queue, &transport).await,
            Err(CommitError::EmptyQueue)
        );
        assert!(!coordinator.is_committing());
    }

    #[tokio::test]
    async fn acknowledgement_by_target_only_is_matched() {
        let (coordinator, queue) = setup();
        queue.lock().add(NewOperation::delete(record("r1")));

        let transport = Fixed(Ok(CommitResult {
            successful: vec![OperationAck {
                operation_id: None,
                target_id: Some("r1".into()),
                kind: None,
            }],
            failed: vec![],
        }));
        let outcome = coordinator.commit(&queue, &transport).await.unwrap();
        assert!(outcome.is_complete());
        assert!(queue.lock().is_empty());
    }

    #[tokio::test]
    async fn failure_notice_carries_original_and_attempted_body() {
        let (coordinator, queue) = setup();
        let op = queue
            .lock()
            .add(NewOperation::edit(record("r1"), RecordPatch::body("edited")).unwrap());

        let transport = Fixed(Ok(CommitResult {
            successful: vec![],
            failed: vec![OperationFailure {
                operation_id: Some(op.id.clone()),
                target_id: None,
                kind: None,
                reason: "conflict".into(),
            }],
        }));
        let outcome = coordinator.commit(&queue, &transport).await.unwrap();
        let notice = &outcome.failures[0];
        assert_eq!(notice.preview.as_deref(), Some(record("r1").body.as_str()));
        assert_eq!(notice.attempted.as_deref(), Some("edited"));
        assert_eq!(notice.kind, Some(OperationKind::Edit));
        assert_eq!(notice.target_id.as_deref(), Some("r1"));
        assert_eq!(
            notice.message(),
            format!("Failed to edit \"{}\": conflict", record("r1").body)
        );
    }

    #[tokio::test]
    async fn handler_may_register_another_handler() {
        let (coordinator, queue) = setup();
        let coordinator = Arc::new(coordinator);
        queue.lock().add(NewOperation::delete(record("r1")));

        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let weak = Arc::downgrade(&coordinator);
        let counter = seen.clone();
        coordinator.on_event(Box::new(move |event| {
            if let CommitEvent::Started { .. } = event {
                if let Some(coordinator) = weak.upgrade() {
                    let counter = counter.clone();
                    coordinator.on_event(Box::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            }
        }));

        let transport = Fixed(Ok(CommitResult::default()));
        coordinator.commit(&queue, &transport).await.unwrap();

        // Only the Committed event reaches the late handler
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
