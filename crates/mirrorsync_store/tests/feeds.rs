//! Change-feed behavior of the in-memory store.

use mirrorsync_store::{
    ChangeKind, CollectionPath, Direction, DocumentPath, DocumentStore, ErrorHandler, MemoryStore,
    QuerySpec, Reference, Snapshot, SnapshotHandler, StoreError, StoreResult,
};
use mirrorsync_value::{Patch, Value};
use parking_lot::Mutex;
use std::sync::Arc;

fn recorder() -> (SnapshotHandler, Arc<Mutex<Vec<Snapshot>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: SnapshotHandler = Arc::new(move |snapshot: Snapshot| sink.lock().push(snapshot));
    (handler, seen)
}

fn ignore_errors() -> ErrorHandler {
    Arc::new(|_: StoreError| {})
}

fn user(age: i64) -> Value {
    Value::map([("age", Value::Integer(age))])
}

fn users() -> QuerySpec {
    QuerySpec::new(CollectionPath::parse("users").unwrap())
}

fn changes(snapshot: &Snapshot) -> Vec<(ChangeKind, String, Option<usize>, Option<usize>)> {
    match snapshot {
        Snapshot::Query(query) => query
            .changes
            .iter()
            .map(|c| (c.kind, c.doc.id().to_string(), c.old_index, c.new_index))
            .collect(),
        other => panic!("expected a query snapshot, got {other:?}"),
    }
}

#[test]
fn delete_reaches_document_and_query_feeds() {
    let store = MemoryStore::new();
    store.set("users/a", user(1)).unwrap();

    let (doc_handler, doc_seen) = recorder();
    let (query_handler, query_seen) = recorder();
    let _doc = store
        .subscribe(&Reference::doc("users/a").unwrap(), doc_handler, ignore_errors())
        .unwrap();
    let _query = store
        .subscribe(&Reference::query(users()), query_handler, ignore_errors())
        .unwrap();

    assert!(store.delete("users/a").unwrap());
    assert!(!store.delete("users/a").unwrap());

    let doc_seen = doc_seen.lock();
    assert_eq!(doc_seen.len(), 2);
    match &doc_seen[1] {
        Snapshot::Document(doc) => assert!(!doc.exists()),
        other => panic!("unexpected snapshot {other:?}"),
    }

    let query_seen = query_seen.lock();
    assert_eq!(query_seen.len(), 2);
    assert_eq!(
        changes(&query_seen[1]),
        vec![(ChangeKind::Removed, "a".to_string(), Some(0), None)]
    );
}

#[test]
fn pending_writes_are_flagged_on_the_touched_document_only() {
    let store = MemoryStore::new();
    store.set("users/a", user(1)).unwrap();
    store.set("users/b", user(2)).unwrap();

    let (handler, seen) = recorder();
    let _sub = store
        .subscribe(&Reference::query(users()), handler, ignore_errors())
        .unwrap();
    store.set_with_pending_writes("users/b", user(3)).unwrap();

    let seen = seen.lock();
    match &seen[1] {
        Snapshot::Query(query) => {
            assert!(query.metadata.has_pending_writes);
            let flags: Vec<bool> = query
                .docs
                .iter()
                .map(|d| d.metadata.has_pending_writes)
                .collect();
            assert_eq!(flags, vec![false, true]);
        }
        other => panic!("unexpected snapshot {other:?}"),
    }
}

#[test]
fn reordering_reports_both_indices() {
    let store = MemoryStore::new();
    store.set("users/a", user(1)).unwrap();
    store.set("users/b", user(2)).unwrap();

    let (handler, seen) = recorder();
    let query = users().order_by("age", Direction::Asc);
    let _sub = store
        .subscribe(&Reference::query(query), handler, ignore_errors())
        .unwrap();
    store.set("users/a", user(5)).unwrap();

    let seen = seen.lock();
    assert_eq!(
        changes(&seen[1]),
        vec![(ChangeKind::Modified, "a".to_string(), Some(0), Some(1))]
    );
    match &seen[1] {
        Snapshot::Query(query) => assert_eq!(query.ids(), vec!["b", "a"]),
        other => panic!("unexpected snapshot {other:?}"),
    }
}

#[test]
fn limit_pushes_the_last_document_out() {
    let store = MemoryStore::new();
    store.set("users/b", user(2)).unwrap();
    store.set("users/c", user(3)).unwrap();

    let (handler, seen) = recorder();
    let query = users().order_by("age", Direction::Asc).limit(2);
    let _sub = store
        .subscribe(&Reference::query(query), handler, ignore_errors())
        .unwrap();
    store.set("users/a", user(1)).unwrap();

    let seen = seen.lock();
    assert_eq!(
        changes(&seen[1]),
        vec![
            (ChangeKind::Removed, "c".to_string(), Some(1), None),
            (ChangeKind::Added, "a".to_string(), None, Some(0)),
        ]
    );
}

#[test]
fn other_collections_are_not_notified() {
    let store = MemoryStore::new();
    let (handler, seen) = recorder();
    let _sub = store
        .subscribe(&Reference::query(users()), handler, ignore_errors())
        .unwrap();

    store.set("teams/x", user(1)).unwrap();
    store.set("users/a/posts/p", user(1)).unwrap();

    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn echo_is_delivered_before_the_write_outcome() {
    let store = Arc::new(MemoryStore::manual());
    store.set("users/a", user(1)).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::clone(&log);
    let _sub = store
        .subscribe(
            &Reference::doc("users/a").unwrap(),
            Arc::new(move |_: Snapshot| events.lock().push("snapshot")),
            ignore_errors(),
        )
        .unwrap();
    store.deliver_pending();
    log.lock().clear();

    let outcome = Arc::clone(&log);
    let mut patch = Patch::new();
    patch.insert("age", Value::Integer(2));
    store.update(
        &DocumentPath::parse("users/a").unwrap(),
        patch,
        Box::new(move |result: StoreResult<()>| {
            assert!(result.is_ok());
            outcome.lock().push("written");
        }),
    );

    assert!(log.lock().is_empty());
    assert_eq!(store.deliver_pending(), 2);
    assert_eq!(*log.lock(), vec!["snapshot", "written"]);
}

#[test]
fn documents_lists_the_store_in_path_order() {
    let store = MemoryStore::new();
    store.set("users/b", user(2)).unwrap();
    store.set("users/a", user(1)).unwrap();

    let paths: Vec<String> = store
        .documents()
        .keys()
        .map(|path| path.as_str().to_string())
        .collect();
    assert_eq!(paths, vec!["users/a", "users/b"]);
}
