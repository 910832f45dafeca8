use std::sync::Arc;

use clipstage_core::{
    Location, NewOperation, Record, RecordKind, RecordPatch, StageConfig, StagingQueue,
    StagingWorkspace,
};

use crate::FileScopeStore;

fn record(id: &str, body: &str) -> Record {
    Record::new(id, body, RecordKind::Note, Location::new(3, 8)).with_page(2)
}

#[test]
fn queue_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();

    let staged = {
        let store = Arc::new(FileScopeStore::open(dir.path()).unwrap());
        let mut queue = StagingQueue::open("book-1", store);
        queue.add(NewOperation::edit(record("r1", "old"), RecordPatch::body("new")).unwrap());
        queue.add(NewOperation::delete(record("r2", "gone")));
        queue.list().to_vec()
    };

    let store = Arc::new(FileScopeStore::open(dir.path()).unwrap());
    let reopened = StagingQueue::open("book-1", store);
    assert_eq!(reopened.list(), staged.as_slice());
}

#[test]
fn clear_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileScopeStore::open(dir.path()).unwrap());
    let mut queue = StagingQueue::open("book-1", store.clone());

    queue.add(NewOperation::delete(record("r1", "x")));
    assert!(store.path_for("staging:book-1").exists());

    queue.clear();
    assert!(!store.path_for("staging:book-1").exists());
}

#[test]
fn corrupt_file_reads_as_empty_queue() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileScopeStore::open(dir.path()).unwrap();
    std::fs::write(store.path_for("staging:book-1"), "{truncated").unwrap();

    let queue = StagingQueue::open("book-1", Arc::new(store));
    assert!(queue.is_empty());
}

#[test]
fn workspace_snapshot_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileScopeStore::open(dir.path()).unwrap());
    let workspace = StagingWorkspace::new(store.clone(), StageConfig::default());
    let cached_at = chrono::Utc::now();
    workspace
        .snapshot_cache()
        .write_at("book-1", vec![record("r1", "a")], cached_at)
        .unwrap();

    let entry = workspace.snapshot_cache().read_entry("book-1").unwrap();
    assert_eq!(entry.cached_at, cached_at);
    assert_eq!(store.keys().unwrap(), vec!["snapshot:book-1".to_string()]);
}
