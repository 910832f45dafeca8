//! Records and staged operations
//!
//! Field names on the wire follow the backend's JSON (`_id`, `highlight`,
//! `knowledge_begin_date`, ...); the Rust names describe what the fields mean.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a scope (one highlight collection, e.g. one book)
pub type ScopeId = String;

/// Stable identifier of a record
pub type RecordId = String;

/// Identifier of a staged operation (only used to unstage it)
pub type OperationId = String;

// ============================================================================
// Records
// ============================================================================

/// What kind of annotation a record is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "highlight", alias = "annotation")]
    Annotation,
    #[serde(rename = "note")]
    Note,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Annotation => "highlight",
            RecordKind::Note => "note",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location range inside the source document.
///
/// `start` is inclusive; an `end` of `-1` means the end is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub start: i64,
    pub end: i64,
}

impl Location {
    pub const UNBOUNDED_END: i64 = -1;

    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// A range with a known start and unknown end
    pub fn open(start: i64) -> Self {
        Self {
            start,
            end: Self::UNBOUNDED_END,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.end == Self::UNBOUNDED_END
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 0 && (self.is_unbounded() || self.end >= self.start)
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::open(0)
    }
}

/// One highlight or note.
///
/// Deletion is a lifecycle transition: a deleted record keeps its place in
/// the collection with `active_until` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id")]
    pub id: RecordId,
    #[serde(rename = "highlight")]
    pub body: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub location: Location,
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(rename = "containsUrl", default)]
    pub contains_url: bool,
    #[serde(rename = "knowledge_begin_date")]
    pub active_from: DateTime<Utc>,
    #[serde(rename = "knowledge_end_date", default)]
    pub active_until: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(
        id: impl Into<RecordId>,
        body: impl Into<String>,
        kind: RecordKind,
        location: Location,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            kind,
            page: None,
            location,
            captured_at: None,
            contains_url: false,
            active_from: Utc::now(),
            active_until: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = Some(at);
        self
    }

    pub fn with_contains_url(mut self, contains_url: bool) -> Self {
        self.contains_url = contains_url;
        self
    }

    /// Live records have no retirement timestamp
    pub fn is_active(&self) -> bool {
        self.active_until.is_none()
    }

    /// Soft-delete the record. An already retired record keeps its original
    /// retirement time.
    pub fn retire(&mut self, at: DateTime<Utc>) {
        if self.active_until.is_none() {
            self.active_until = Some(at);
        }
    }
}

/// Editable subset of a record's fields. The record kind cannot be edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(rename = "highlight", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    /// Patch that only replaces the body text
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_none()
            && self.page.is_none()
            && self.location.is_none()
            && self.captured_at.is_none()
    }

    /// Overlay the patch onto `record` in place
    pub fn apply_to(&self, record: &mut Record) {
        if let Some(body) = &self.body {
            record.body = body.clone();
        }
        if let Some(page) = self.page {
            record.page = Some(page);
        }
        if let Some(location) = self.location {
            record.location = location;
        }
        if let Some(at) = self.captured_at {
            record.captured_at = Some(at);
        }
    }

    /// Copy of `record` with the patch applied
    pub fn applied(&self, record: &Record) -> Record {
        let mut patched = record.clone();
        self.apply_to(&mut patched);
        patched
    }

    /// Whether applying the patch would change anything on `record`
    pub fn changes(&self, record: &Record) -> bool {
        self.applied(record) != *record
    }
}

// ============================================================================
// Staged Operations
// ============================================================================

/// Kind of staged intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Edit,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Edit => "edit",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected edit intent. Never enters the queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Highlight text cannot be empty")]
    EmptyBody,
    #[error("Edit for {0} does not change anything")]
    Unchanged(RecordId),
    #[error("Invalid location range {start}..{end}")]
    InvalidLocation { start: i64, end: i64 },
    #[error("Record {0} is already deleted")]
    Retired(RecordId),
}

/// A caller's intent, before it is stamped and queued
#[derive(Debug, Clone, PartialEq)]
pub enum NewOperation {
    Edit { original: Record, patch: RecordPatch },
    Delete { original: Record },
}

impl NewOperation {
    /// Validate and build an edit intent
    pub fn edit(original: Record, patch: RecordPatch) -> Result<Self, ValidationError> {
        if !original.is_active() {
            return Err(ValidationError::Retired(original.id));
        }
        if let Some(body) = &patch.body {
            if body.trim().is_empty() {
                return Err(ValidationError::EmptyBody);
            }
        }
        if let Some(location) = patch.location {
            if !location.is_valid() {
                return Err(ValidationError::InvalidLocation {
                    start: location.start,
                    end: location.end,
                });
            }
        }
        if !patch.changes(&original) {
            return Err(ValidationError::Unchanged(original.id));
        }
        Ok(NewOperation::Edit { original, patch })
    }

    pub fn delete(original: Record) -> Self {
        NewOperation::Delete { original }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            NewOperation::Edit { .. } => OperationKind::Edit,
            NewOperation::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            NewOperation::Edit { original, .. } | NewOperation::Delete { original } => {
                &original.id
            }
        }
    }
}

/// A pending, not yet confirmed intent against one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedOperation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    #[serde(rename = "highlightId")]
    pub target_id: RecordId,
    #[serde(rename = "originalHighlight")]
    pub original: Record,
    #[serde(rename = "updatedHighlight", default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<RecordPatch>,
    #[serde(rename = "timestamp")]
    pub staged_at: DateTime<Utc>,
}

/// `{kind}_{target}_{millis}`; deterministic in its inputs
pub fn operation_id(kind: OperationKind, target_id: &str, staged_at: DateTime<Utc>) -> OperationId {
    format!("{}_{}_{}", kind, target_id, staged_at.timestamp_millis())
}

impl StagedOperation {
    /// Stamp an intent with its staging time
    pub fn stage(operation: NewOperation, staged_at: DateTime<Utc>) -> Self {
        let kind = operation.kind();
        let (original, patch) = match operation {
            NewOperation::Edit { original, patch } => (original, Some(patch)),
            NewOperation::Delete { original } => (original, None),
        };
        Self {
            id: operation_id(kind, &original.id, staged_at),
            kind,
            target_id: original.id.clone(),
            original,
            patch,
            staged_at,
        }
    }

    /// Body text the user will see once this operation lands
    pub fn effective_body(&self) -> &str {
        match (self.kind, &self.patch) {
            (OperationKind::Edit, Some(patch)) => {
                patch.body.as_deref().unwrap_or(&self.original.body)
            }
            _ => &self.original.body,
        }
    }

    /// Display text truncated to `max_chars` characters
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(self.effective_body(), max_chars)
    }

    /// Body text of the record as it was when staged, truncated to
    /// `max_chars` characters
    pub fn original_preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.original.body, max_chars)
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new("r1", "old", RecordKind::Annotation, Location::new(10, 20)).with_page(3)
    }

    #[test]
    fn record_wire_names() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["_id"], "r1");
        assert_eq!(json["highlight"], "old");
        assert_eq!(json["type"], "highlight");
        assert_eq!(json["knowledge_end_date"], serde_json::Value::Null);
        assert!(json.get("knowledge_begin_date").is_some());
    }

    #[test]
    fn annotation_alias_accepted() {
        let kind: RecordKind = serde_json::from_str("\"annotation\"").unwrap();
        assert_eq!(kind, RecordKind::Annotation);
    }

    #[test]
    fn backend_record_decodes_with_missing_optionals() {
        let json = r#"{
            "_id": "abc",
            "highlight": "some text",
            "type": "note",
            "location": { "start": 5, "end": -1 },
            "knowledge_begin_date": "2024-01-02T03:04:05Z",
            "knowledge_end_date": null
        }"#;
        let rec: Record = serde_json::from_str(json).unwrap();
        assert_eq!(rec.kind, RecordKind::Note);
        assert!(rec.location.is_unbounded());
        assert!(rec.is_active());
        assert!(!rec.contains_url);
        assert_eq!(rec.page, None);
    }

    #[test]
    fn patch_overlays_only_set_fields() {
        let base = record();
        let patched = RecordPatch::body("new").applied(&base);
        assert_eq!(patched.body, "new");
        assert_eq!(patched.page, base.page);
        assert_eq!(patched.location, base.location);
        assert_eq!(patched.active_from, base.active_from);
    }

    #[test]
    fn edit_validation() {
        assert_eq!(
            NewOperation::edit(record(), RecordPatch::body("   ")),
            Err(ValidationError::EmptyBody)
        );
        assert_eq!(
            NewOperation::edit(record(), RecordPatch::body("old")),
            Err(ValidationError::Unchanged("r1".into()))
        );
        assert_eq!(
            NewOperation::edit(record(), RecordPatch::default().with_location(Location::new(9, 3))),
            Err(ValidationError::InvalidLocation { start: 9, end: 3 })
        );

        let mut retired = record();
        retired.retire(Utc::now());
        assert!(matches!(
            NewOperation::edit(retired, RecordPatch::body("x")),
            Err(ValidationError::Retired(_))
        ));

        assert!(NewOperation::edit(record(), RecordPatch::body("new")).is_ok());
    }

    #[test]
    fn staged_operation_id_is_derived() {
        let at = Utc::now();
        let op = StagedOperation::stage(NewOperation::delete(record()), at);
        assert_eq!(op.id, format!("delete_r1_{}", at.timestamp_millis()));
        assert_eq!(op.target_id, "r1");
        assert!(op.patch.is_none());
    }

    #[test]
    fn preview_prefers_patched_body_and_truncates() {
        let op = StagedOperation::stage(
            NewOperation::edit(record(), RecordPatch::body("héllo world")).unwrap(),
            Utc::now(),
        );
        assert_eq!(op.preview(100), "héllo world");
        assert_eq!(op.preview(5), "héllo...");

        let del = StagedOperation::stage(NewOperation::delete(record()), Utc::now());
        assert_eq!(del.preview(100), "old");
    }

    #[test]
    fn retire_keeps_first_timestamp() {
        let mut rec = record();
        let first = Utc::now();
        rec.retire(first);
        rec.retire(first + chrono::Duration::seconds(5));
        assert_eq!(rec.active_until, Some(first));
    }
}
