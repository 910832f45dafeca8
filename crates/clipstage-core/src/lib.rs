//! Clipstage Core
//!
//! Stages edits and deletes against highlight collections locally, shows
//! the collection as it will look once they land, and commits them to the
//! backend in one batch:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        SCOPE SESSION                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌─────────┐     ┌───────────────┐     ┌─────────────┐             │
//! │  │  User   │────►│   Staging     │────►│ Scope Store │             │
//! │  │  Edits  │     │   Queue       │     │ staging:{id}│             │
//! │  └─────────┘     └───────────────┘     └─────────────┘             │
//! │                     │         │                                     │
//! │                     ▼         ▼                                     │
//! │  ┌─────────────┐  ┌─────────────┐      ┌─────────────┐             │
//! │  │  Projector  │  │   Commit    │─────►│  Backend    │             │
//! │  │ (view)      │  │ Coordinator │◄─────│  (batch)    │             │
//! │  └─────────────┘  └─────────────┘      └─────────────┘             │
//! │         ▲                │                                          │
//! │         │                ▼                                          │
//! │         │         ┌──────────────┐                                  │
//! │         └─────────│   Snapshot   │  snapshot:{id}                   │
//! │                   │   Cache      │                                  │
//! │                   └──────────────┘                                  │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Last intent wins**: one staged operation per record
//! - **Write-through**: every queue mutation is persisted immediately
//! - **Soft deletes**: confirmed deletes retire records, never remove them
//! - **Partial success**: confirmed operations reach the snapshot even when
//!   others in the batch fail

pub mod commit;
pub mod config;
pub mod filter;
pub mod loader;
pub mod model;
pub mod projector;
pub mod queue;
pub mod snapshot;
pub mod store;
pub mod workspace;

pub use commit::{
    CommitCoordinator, CommitError, CommitEvent, CommitEventHandler, CommitOutcome,
    CommitRequest, CommitResult, CommitTransport, FailureNotice, OperationAck, OperationFailure,
    TransportError,
};
pub use config::{QueueRetention, StageConfig};
pub use filter::{sort_records, sort_view, SortKey, ViewFilter};
pub use loader::{FetchError, LoadSource, LoadedScope, RecordFetcher, ScopeLoader};
pub use model::{
    Location, NewOperation, OperationId, OperationKind, Record, RecordId, RecordKind,
    RecordPatch, ScopeId, StagedOperation, ValidationError,
};
pub use projector::{project, PendingMarker, ViewRecord};
pub use queue::StagingQueue;
pub use snapshot::{apply_confirmed, LocalSnapshotCache, SnapshotEntry};
pub use store::{snapshot_key, staging_key, MemoryScopeStore, ScopeStore, StoreError};
pub use workspace::{ScopeSession, StagingWorkspace};
