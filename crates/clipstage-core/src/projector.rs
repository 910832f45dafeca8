//! Effective view projection
//!
//! Folds staged operations over a base collection. Pure: the same
//! `(base, operations)` pair always yields the same view.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{OperationId, OperationKind, Record, StagedOperation};
use crate::queue::StagingQueue;

/// Marker for records shown with a staged change applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PendingMarker {
    Edit { operation_id: OperationId },
}

/// A record as it should be displayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub record: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingMarker>,
}

impl ViewRecord {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Project `base` through `operations`.
///
/// Retired records and records with a staged delete are left out; staged
/// edits are overlaid and marked. Output keeps the order of `base`.
pub fn project(base: &[Record], operations: &[StagedOperation]) -> Vec<ViewRecord> {
    let staged: HashMap<&str, &StagedOperation> = operations
        .iter()
        .map(|op| (op.target_id.as_str(), op))
        .collect();

    base.iter()
        .filter(|record| record.is_active())
        .filter_map(|record| match staged.get(record.id.as_str()) {
            Some(op) if op.kind == OperationKind::Delete => None,
            Some(op) => {
                let record = match &op.patch {
                    Some(patch) => patch.applied(record),
                    None => record.clone(),
                };
                Some(ViewRecord {
                    record,
                    pending: Some(PendingMarker::Edit {
                        operation_id: op.id.clone(),
                    }),
                })
            }
            None => Some(ViewRecord {
                record: record.clone(),
                pending: None,
            }),
        })
        .collect()
}

/// `project` against a live queue
pub fn project_queue(base: &[Record], queue: &StagingQueue) -> Vec<ViewRecord> {
    project(base, queue.list())
}

/// Strip view markers, keeping only the records
pub fn into_records(view: Vec<ViewRecord>) -> Vec<Record> {
    view.into_iter().map(|v| v.record).collect()
}
